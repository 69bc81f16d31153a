use std::collections::HashMap;

use crate::{
    keyed_list::KeyedList,
    probe::{ProbeError, ProbeRequest, probe_url},
    state::{Connection, ConnectionUpdate},
};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeRecord {
    pub sent_at_ms: Option<i64>,
    pub failure_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unreachable {
    pub remote_key: String,
    pub connection: Connection,
    pub failures: u32,
}

#[derive(Debug, Default)]
pub struct ReachabilityRound {
    pub probes: Vec<ProbeRequest<String>>,
    pub unreachable: Vec<Unreachable>,
}

/// Per-connection failure accounting. A connection becomes unreachable once
/// its consecutive failure count exceeds the threshold; the transition is
/// reported exactly once and the connection's state is forgotten afterwards.
pub struct ReachabilityMonitor {
    threshold: u32,
    records: HashMap<String, ProbeRecord>,
}

impl ReachabilityMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            records: HashMap::new(),
        }
    }

    pub fn record(&self, remote_key: &str) -> Option<&ProbeRecord> {
        self.records.get(remote_key)
    }

    pub fn failure_count(&self, remote_key: &str) -> u32 {
        self.record(remote_key)
            .map(|record| record.failure_count)
            .unwrap_or(0)
    }

    pub fn is_outstanding(&self, remote_key: &str) -> bool {
        self.record(remote_key)
            .is_some_and(|record| record.sent_at_ms.is_some())
    }

    pub fn untrack(&mut self, remote_key: &str) {
        self.records.remove(remote_key);
    }

    /// Starts one probe per tracked connection. Connections that still have a
    /// probe in flight are skipped for this round.
    pub fn tick(&mut self, connections: &KeyedList<Connection>, now_ms: i64) -> ReachabilityRound {
        self.records
            .retain(|remote_key, _| connections.contains(remote_key));

        let mut round = ReachabilityRound::default();
        for connection in connections {
            let remote_key = &connection.remote_key;
            if self.is_outstanding(remote_key) {
                log::debug!("[reachability] {remote_key}: previous probe still in flight");
                continue;
            }

            match probe_url(&connection.ws_address) {
                Ok(url) => {
                    self.records.entry(remote_key.clone()).or_default().sent_at_ms = Some(now_ms);
                    round.probes.push(ProbeRequest {
                        key: remote_key.clone(),
                        url,
                    });
                }
                Err(error) => {
                    log::warn!("[reachability] {remote_key}: cannot probe: {error}");
                    if let Some(unreachable) = self.register_failure(connections, remote_key) {
                        round.unreachable.push(unreachable);
                    }
                }
            }
        }
        round
    }

    /// Replies for keys that are no longer tracked, or that have no probe in
    /// flight, are ignored.
    pub fn on_reply(
        &mut self,
        connections: &mut KeyedList<Connection>,
        remote_key: &str,
        outcome: Result<(), ProbeError>,
        now_ms: i64,
    ) -> Option<Unreachable> {
        let key = remote_key.to_string();
        if !connections.contains(&key) {
            self.records.remove(remote_key);
            log::debug!("[reachability] {remote_key}: reply for untracked connection dropped");
            return None;
        }

        let sent_at_ms = self
            .records
            .get_mut(remote_key)
            .and_then(|record| record.sent_at_ms.take());
        let Some(sent_at_ms) = sent_at_ms else {
            log::debug!("[reachability] {remote_key}: reply without outstanding probe dropped");
            return None;
        };

        match outcome {
            Ok(()) => {
                let latency_ms = (now_ms - sent_at_ms).max(0);
                if !connections.update_field(&key, ConnectionUpdate::LatencyMs(latency_ms)) {
                    log::warn!("[reachability] {remote_key}: failed to update latency");
                }
                if let Some(record) = self.records.get_mut(remote_key) {
                    record.failure_count = 0;
                }
                log::trace!("[reachability] {remote_key}: {latency_ms}ms");
                None
            }
            Err(error) => {
                log::debug!("[reachability] {remote_key}: probe failed: {error}");
                self.register_failure(connections, remote_key)
            }
        }
    }

    fn register_failure(
        &mut self,
        connections: &KeyedList<Connection>,
        remote_key: &str,
    ) -> Option<Unreachable> {
        let record = self.records.entry(remote_key.to_string()).or_default();
        record.failure_count += 1;
        let failures = record.failure_count;
        if failures <= self.threshold {
            return None;
        }

        self.records.remove(remote_key);
        let connection = connections.find(&remote_key.to_string())?.clone();
        log::warn!(
            "[reachability] {remote_key} unreachable after {failures} consecutive failed probes"
        );
        Some(Unreachable {
            remote_key: remote_key.to_string(),
            connection,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::reconcile::reconcile;

    fn tracked(keys: &[&str]) -> KeyedList<Connection> {
        let mut list = KeyedList::new();
        for key in keys {
            list.insert(Connection::new(
                key.to_string(),
                format!("wss://{key}.example/tunnel"),
                "127.0.0.1:9000".into(),
            ));
        }
        list
    }

    fn failed() -> Result<(), ProbeError> {
        Err(ProbeError::Timeout(Duration::from_millis(2000)))
    }

    fn round(
        monitor: &mut ReachabilityMonitor,
        list: &mut KeyedList<Connection>,
        key: &str,
        outcome: Result<(), ProbeError>,
        now_ms: i64,
    ) -> Option<Unreachable> {
        let probes = monitor.tick(list, now_ms).probes;
        assert!(probes.iter().any(|probe| probe.key == key));
        monitor.on_reply(list, key, outcome, now_ms + 10)
    }

    #[test]
    fn tick_maps_urls_and_records_dispatch_time() {
        let mut monitor = ReachabilityMonitor::new(DEFAULT_FAILURE_THRESHOLD);
        let list = tracked(&["a", "b"]);

        let round = monitor.tick(&list, 1_000);

        let urls: Vec<_> = round.probes.iter().map(|probe| probe.url.as_str()).collect();
        assert_eq!(urls, ["https://a.example/tunnel", "https://b.example/tunnel"]);
        assert_eq!(monitor.record("a").and_then(|record| record.sent_at_ms), Some(1_000));
        assert!(monitor.is_outstanding("b"));
    }

    #[test]
    fn fourth_consecutive_failure_is_reported_once() {
        let mut monitor = ReachabilityMonitor::new(DEFAULT_FAILURE_THRESHOLD);
        let mut list = tracked(&["a"]);

        for attempt in 1..=3 {
            assert_eq!(round(&mut monitor, &mut list, "a", failed(), attempt * 3_000), None);
            assert_eq!(monitor.failure_count("a"), attempt as u32);
        }
        let unreachable = round(&mut monitor, &mut list, "a", failed(), 12_000).unwrap();

        assert_eq!(unreachable.remote_key, "a");
        assert_eq!(unreachable.failures, 4);
        assert_eq!(unreachable.connection.ws_address, "wss://a.example/tunnel");
        assert!(monitor.record("a").is_none());
    }

    #[test]
    fn success_resets_failure_count() {
        let mut monitor = ReachabilityMonitor::new(DEFAULT_FAILURE_THRESHOLD);
        let mut list = tracked(&["a"]);

        assert_eq!(round(&mut monitor, &mut list, "a", failed(), 0), None);
        assert_eq!(round(&mut monitor, &mut list, "a", failed(), 3_000), None);
        assert_eq!(round(&mut monitor, &mut list, "a", Ok(()), 6_000), None);
        assert_eq!(monitor.failure_count("a"), 0);
        assert_eq!(round(&mut monitor, &mut list, "a", failed(), 9_000), None);
        assert_eq!(monitor.failure_count("a"), 1);
    }

    #[test]
    fn latency_is_elapsed_time_and_never_negative() {
        let mut monitor = ReachabilityMonitor::new(DEFAULT_FAILURE_THRESHOLD);
        let mut list = tracked(&["a", "b"]);

        monitor.tick(&list, 5_000);
        monitor.on_reply(&mut list, "b", Ok(()), 5_042);
        monitor.on_reply(&mut list, "a", Ok(()), 4_990);

        let latency = |key: &str| list.find(&key.to_string()).map(|entry| entry.latency_ms);
        assert_eq!(latency("b"), Some(42));
        assert_eq!(latency("a"), Some(0));
    }

    #[test]
    fn replies_are_matched_by_key_not_arrival_order() {
        let mut monitor = ReachabilityMonitor::new(DEFAULT_FAILURE_THRESHOLD);
        let mut list = tracked(&["a", "b", "c"]);

        monitor.tick(&list, 0);
        monitor.on_reply(&mut list, "c", failed(), 30);
        monitor.on_reply(&mut list, "a", Ok(()), 70);
        monitor.on_reply(&mut list, "b", Ok(()), 20);

        let latencies: Vec<_> = list.iter().map(|entry| entry.latency_ms).collect();
        assert_eq!(latencies, [70, 20, -1]);
        assert_eq!(monitor.failure_count("c"), 1);
    }

    #[test]
    fn outstanding_probe_is_not_reissued() {
        let mut monitor = ReachabilityMonitor::new(DEFAULT_FAILURE_THRESHOLD);
        let mut list = tracked(&["a"]);

        assert_eq!(monitor.tick(&list, 0).probes.len(), 1);
        assert!(monitor.tick(&list, 3_000).probes.is_empty());

        monitor.on_reply(&mut list, "a", Ok(()), 3_500);
        assert_eq!(list.find(&"a".to_string()).map(|entry| entry.latency_ms), Some(3_500));
        assert_eq!(monitor.tick(&list, 6_000).probes.len(), 1);
    }

    #[test]
    fn reply_for_untracked_key_is_a_no_op() {
        let mut monitor = ReachabilityMonitor::new(DEFAULT_FAILURE_THRESHOLD);
        let mut list = tracked(&["a", "b"]);

        monitor.tick(&list, 0);
        list.remove_by_key(&"a".to_string());

        assert_eq!(monitor.on_reply(&mut list, "a", failed(), 10), None);
        assert_eq!(monitor.on_reply(&mut list, "ghost", Ok(()), 10), None);
        assert!(monitor.record("a").is_none());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn unprobeable_address_counts_as_failure() {
        let mut monitor = ReachabilityMonitor::new(1);
        let mut list = KeyedList::new();
        list.insert(Connection::new(
            "bad".into(),
            "tcp://nowhere".into(),
            "127.0.0.1:1".into(),
        ));

        assert!(monitor.tick(&list, 0).unreachable.is_empty());
        let round = monitor.tick(&list, 3_000);

        assert!(round.probes.is_empty());
        assert_eq!(round.unreachable.len(), 1);
    }

    #[test]
    fn measured_latency_survives_snapshot_resync() {
        let mut monitor = ReachabilityMonitor::new(DEFAULT_FAILURE_THRESHOLD);
        let mut list = tracked(&["a"]);
        monitor.tick(&list, 0);
        monitor.on_reply(&mut list, "a", Ok(()), 25);

        let snapshot = tracked(&["a"]).iter().cloned().collect();
        reconcile(&mut list, snapshot);

        assert_eq!(list.find(&"a".to_string()).map(|entry| entry.latency_ms), Some(25));
    }
}
