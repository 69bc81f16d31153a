use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use futures::channel::mpsc::UnboundedReceiver as ListEvents;
use serde::Deserialize;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    time::{Interval, MissedTickBehavior},
};

use crate::{
    configuration::MonitorConfiguration,
    daemon_api::{ApiError, ControlApi},
    heartbeat::{DaemonHealth, HealthTransition},
    keyed_list::{KeyedList, ListEvent, describe},
    link_monitor::LinkStatusMonitor,
    probe::{ProbeError, Prober, now_ms},
    reachability::{ReachabilityMonitor, Unreachable},
    reconcile::{ReconcileReport, reconcile},
    snapshot::{PoolRecord, parse_access, parse_pool, pool_connections},
    state::{Connection, ConnectionField, Link, LinkField, LinkKey, Website, WebsiteField},
};

/// Results of asynchronous work, delivered back to the event loop.
pub enum Completion {
    Probe {
        remote_key: String,
        outcome: Result<(), ProbeError>,
        finished_at_ms: i64,
    },
    LinkProbe {
        key: LinkKey,
        outcome: Result<(), ProbeError>,
        finished_at_ms: i64,
    },
    Pool(Result<Vec<u8>, ApiError>),
    Access(Result<Vec<u8>, ApiError>),
    Heartbeat(Result<(), ApiError>),
    Launched {
        from: String,
        to: String,
        result: Result<Vec<u8>, ApiError>,
    },
    Closed {
        remote_key: String,
        key: String,
        result: Result<(), ApiError>,
    },
    AccessChanged {
        domain: String,
        allowed: bool,
        result: Result<(), ApiError>,
    },
}

#[derive(Deserialize)]
struct LaunchedTunnel {
    from: String,
    to: String,
}

pub struct MonitorApp {
    configuration: MonitorConfiguration,
    api: ControlApi,
    prober: Arc<dyn Prober>,
    active: KeyedList<Connection>,
    history: KeyedList<Connection>,
    links: KeyedList<Link>,
    websites: KeyedList<Website>,
    reachability: ReachabilityMonitor,
    link_monitor: LinkStatusMonitor,
    health: DaemonHealth,
    closing: HashSet<String>,
    completions: UnboundedSender<Completion>,
}

fn timer(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn log_report(tag: &str, report: ReconcileReport) {
    if report.is_unchanged() {
        return;
    }
    log::info!(
        "[reconcile] {tag}: {} added, {} removed, {} refreshed",
        report.inserted,
        report.removed,
        report.updated
    );
}

impl MonitorApp {
    pub fn new(
        configuration: MonitorConfiguration,
        api: ControlApi,
        prober: Arc<dyn Prober>,
    ) -> (Self, UnboundedReceiver<Completion>) {
        let (completions, receiver) = unbounded_channel();
        let app = Self {
            reachability: ReachabilityMonitor::new(configuration.failure_threshold),
            health: DaemonHealth::new(configuration.heartbeat_failure_limit),
            configuration,
            api,
            prober,
            active: KeyedList::new(),
            history: KeyedList::new(),
            links: KeyedList::new(),
            websites: KeyedList::new(),
            link_monitor: LinkStatusMonitor::new(),
            closing: HashSet::new(),
            completions,
        };
        (app, receiver)
    }

    pub fn active(&self) -> &KeyedList<Connection> {
        &self.active
    }

    pub fn history(&self) -> &KeyedList<Connection> {
        &self.history
    }

    pub fn links(&self) -> &KeyedList<Link> {
        &self.links
    }

    pub fn websites(&self) -> &KeyedList<Website> {
        &self.websites
    }

    pub fn subscribe_active(&mut self) -> ListEvents<ListEvent<ConnectionField>> {
        self.active.subscribe()
    }

    pub fn subscribe_history(&mut self) -> ListEvents<ListEvent<ConnectionField>> {
        self.history.subscribe()
    }

    pub fn subscribe_links(&mut self) -> ListEvents<ListEvent<LinkField>> {
        self.links.subscribe()
    }

    pub fn subscribe_websites(&mut self) -> ListEvents<ListEvent<WebsiteField>> {
        self.websites.subscribe()
    }

    pub async fn run(mut self, mut completions: UnboundedReceiver<Completion>) {
        for tunnel in self.configuration.tunnels.clone() {
            self.connect(&tunnel.from, &tunnel.to);
        }

        let mut probe_timer = timer(self.configuration.probe_interval());
        let mut link_timer = timer(self.configuration.link_probe_interval());
        let mut pool_timer = timer(self.configuration.pool_sync_interval());
        let mut access_timer = timer(self.configuration.access_sync_interval());
        let mut heartbeat_timer = timer(self.configuration.heartbeat_interval());

        log::info!("[daemon] monitoring control api at {}", self.api.root());
        loop {
            tokio::select! {
                _ = probe_timer.tick() => self.probe_connections(),
                _ = link_timer.tick() => self.probe_links(),
                _ = pool_timer.tick() => self.sync_pool(),
                _ = access_timer.tick() => self.sync_access(),
                _ = heartbeat_timer.tick() => self.check_heartbeat(),
                Some(completion) = completions.recv() => self.handle(completion),
            }
        }
    }

    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let _ = completions.send(work.await);
        });
    }

    pub fn probe_connections(&mut self) {
        let round = self.reachability.tick(&self.active, now_ms());
        for unreachable in round.unreachable {
            self.evict(unreachable);
        }
        for request in round.probes {
            let probe = self.prober.probe(request.url);
            let remote_key = request.key;
            self.spawn(async move {
                let outcome = probe.await;
                Completion::Probe {
                    remote_key,
                    outcome,
                    finished_at_ms: now_ms(),
                }
            });
        }
    }

    pub fn probe_links(&mut self) {
        for request in self.link_monitor.tick(&mut self.links, now_ms()) {
            let probe = self.prober.probe(request.url);
            let key = request.key;
            self.spawn(async move {
                let outcome = probe.await;
                Completion::LinkProbe {
                    key,
                    outcome,
                    finished_at_ms: now_ms(),
                }
            });
        }
    }

    pub fn sync_pool(&self) {
        let api = self.api.clone();
        self.spawn(async move { Completion::Pool(api.fetch_pool().await) });
    }

    pub fn sync_access(&self) {
        let api = self.api.clone();
        self.spawn(async move { Completion::Access(api.fetch_access().await) });
    }

    pub fn check_heartbeat(&self) {
        let api = self.api.clone();
        self.spawn(async move { Completion::Heartbeat(api.heartbeat().await) });
    }

    /// Dead links only come back through a full resync.
    pub fn resync_links(&mut self) {
        self.links.clear();
        self.sync_pool();
    }

    pub fn connect(&self, from: &str, to: &str) {
        let api = self.api.clone();
        let (from, to) = (from.to_string(), to.to_string());
        log::info!("[daemon] requesting tunnel {from} <-> {to}");
        self.spawn(async move {
            let result = api.launch(&from, &to).await;
            Completion::Launched { from, to, result }
        });
    }

    /// Tears the tunnel down and keeps the connection, with its last latency,
    /// in the history list.
    pub fn cancel(&mut self, remote_key: &str) -> bool {
        let key = remote_key.to_string();
        let Some(connection) = self.active.remove_by_key(&key) else {
            return false;
        };
        self.reachability.untrack(remote_key);
        log::info!("[daemon] cancelling connection [{remote_key}]");

        self.closing.insert(key.clone());
        let api = self.api.clone();
        let close_key = connection.tcp_address.clone();
        self.spawn(async move {
            let result = api.close(&close_key).await;
            Completion::Closed {
                remote_key: key,
                key: close_key,
                result,
            }
        });

        self.history.remove_by_key(&connection.remote_key);
        self.history.insert(connection);
        true
    }

    /// Cancelled and evicted connections stay out of the active list even
    /// while the daemon still reports them in its pool.
    fn is_retired(&self, remote_key: &str) -> bool {
        self.closing.contains(remote_key) || self.history.contains(&remote_key.to_string())
    }

    pub fn remove_history(&mut self, remote_key: &str) -> bool {
        let removed = self.history.remove_by_key(&remote_key.to_string()).is_some();
        if removed {
            log::info!("[daemon] removed history connection [{remote_key}]");
        }
        removed
    }

    pub fn allow(&self, domain: &str) {
        self.change_access(domain, true);
    }

    pub fn deny(&self, domain: &str) {
        self.change_access(domain, false);
    }

    fn change_access(&self, domain: &str, allowed: bool) {
        let api = self.api.clone();
        let domain = domain.to_string();
        self.spawn(async move {
            let result = if allowed {
                api.allow(&domain).await
            } else {
                api.deny(&domain).await
            };
            Completion::AccessChanged {
                domain,
                allowed,
                result,
            }
        });
    }

    fn evict(&mut self, unreachable: Unreachable) {
        log::warn!(
            "[reachability] moving unreachable connection to history: {}",
            describe(&unreachable.connection)
        );
        self.cancel(&unreachable.remote_key);
    }

    pub fn handle(&mut self, completion: Completion) {
        match completion {
            Completion::Probe {
                remote_key,
                outcome,
                finished_at_ms,
            } => {
                let unreachable = self.reachability.on_reply(
                    &mut self.active,
                    &remote_key,
                    outcome,
                    finished_at_ms,
                );
                if let Some(unreachable) = unreachable {
                    self.evict(unreachable);
                }
            }
            Completion::LinkProbe {
                key,
                outcome,
                finished_at_ms,
            } => {
                let status = self
                    .link_monitor
                    .on_reply(&mut self.links, &key, outcome, finished_at_ms);
                if status.is_some()
                    && let Some(link) = self.links.find(&key)
                {
                    log::debug!("[links] {}", describe(link));
                }
            }
            Completion::Pool(Ok(body)) => self.apply_pool(&body),
            Completion::Pool(Err(error)) => log::warn!("[daemon] failed to sync pool: {error}"),
            Completion::Access(Ok(body)) => self.apply_access(&body),
            Completion::Access(Err(error)) => {
                log::warn!("[daemon] failed to sync access list: {error}")
            }
            Completion::Heartbeat(Ok(())) => {
                if self.health.record_success() == HealthTransition::Recovered {
                    log::info!("[daemon] control api is responding again, resyncing pool");
                    self.resync_links();
                }
            }
            Completion::Heartbeat(Err(error)) => {
                log::debug!("[daemon] heartbeat failed: {error}");
                if self.health.record_failure() == HealthTransition::Lost {
                    log::error!(
                        "[daemon] control api unreachable after {} heartbeats: {error}",
                        self.health.consecutive_failures()
                    );
                }
            }
            Completion::Launched { from, to, result } => match result {
                Ok(body) => {
                    log::info!("[daemon] tunnel {from} <-> {to} established");
                    self.track_launched(&body, &from, &to);
                    self.sync_pool();
                }
                Err(error) => log::warn!("[daemon] failed to launch tunnel {from} <-> {to}: {error}"),
            },
            Completion::Closed {
                remote_key,
                key,
                result,
            } => {
                self.closing.remove(&remote_key);
                match result {
                    Ok(()) => log::info!("[daemon] tunnel {key} closed"),
                    Err(error) => log::warn!("[daemon] failed to close tunnel {key}: {error}"),
                }
                self.sync_pool();
            }
            Completion::AccessChanged {
                domain,
                allowed,
                result,
            } => {
                let action = if allowed { "allow" } else { "deny" };
                match result {
                    Ok(()) => {
                        log::info!("[daemon] {action} {domain}");
                        self.sync_access();
                    }
                    Err(error) => log::warn!("[daemon] failed to {action} {domain}: {error}"),
                }
            }
        }
    }

    fn track_launched(&mut self, body: &[u8], from: &str, to: &str) {
        let (from, to) = match serde_json::from_slice::<LaunchedTunnel>(body) {
            Ok(tunnel) => (tunnel.from, tunnel.to),
            Err(_) => (from.to_string(), to.to_string()),
        };
        match Connection::from_tunnel(&to, &from) {
            Some(connection) => {
                self.closing.remove(&connection.remote_key);
                self.history.remove_by_key(&connection.remote_key);
                self.active.insert(connection);
            }
            None => log::warn!("[reachability] cannot derive a key for {from} <-> {to}"),
        }
    }

    fn apply_pool(&mut self, body: &[u8]) {
        let parsed = match parse_pool(body) {
            Ok(parsed) => parsed,
            Err(error) => {
                log::warn!("[daemon] discarding pool snapshot: {error}");
                return;
            }
        };
        parsed.log_rejected("links");

        let links = parsed.records.iter().map(PoolRecord::to_link).collect();
        log_report("links", reconcile(&mut self.links, links));

        let mut connections = pool_connections(&parsed.records);
        connections.log_rejected("reachability");
        connections
            .records
            .retain(|connection| !self.is_retired(&connection.remote_key));
        log_report("connections", reconcile(&mut self.active, connections.records));

        self.probe_links();
    }

    fn apply_access(&mut self, body: &[u8]) {
        match parse_access(body) {
            Ok(parsed) => {
                parsed.log_rejected("access");
                log_report("access", reconcile(&mut self.websites, parsed.records));
            }
            Err(error) => log::warn!("[daemon] discarding access snapshot: {error}"),
        }
    }
}
