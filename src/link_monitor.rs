use std::collections::HashMap;

use crate::{
    keyed_list::{Entity, KeyedList},
    probe::{ProbeError, ProbeRequest, probe_url},
    state::{Link, LinkKey, LinkStatus, LinkUpdate},
};

/// Probes pooled links. One failed probe marks a link `Dead`, and dead links
/// are left alone until a full resync brings them back as `Pooling`.
#[derive(Default)]
pub struct LinkStatusMonitor {
    in_flight: HashMap<LinkKey, i64>,
}

impl LinkStatusMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_outstanding(&self, key: &LinkKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn tick(&mut self, links: &mut KeyedList<Link>, now_ms: i64) -> Vec<ProbeRequest<LinkKey>> {
        self.in_flight.retain(|key, _| links.contains(key));

        let mut probes = Vec::new();
        let mut unprobeable = Vec::new();
        for link in links.iter() {
            if link.status == LinkStatus::Dead {
                continue;
            }
            let key = link.key();
            if self.is_outstanding(&key) {
                continue;
            }
            match probe_url(&link.to) {
                Ok(url) => {
                    self.in_flight.insert(key.clone(), now_ms);
                    probes.push(ProbeRequest { key, url });
                }
                Err(error) => {
                    log::warn!("[links] {key}: cannot probe: {error}");
                    unprobeable.push(key);
                }
            }
        }

        for key in unprobeable {
            links.update_field(&key, LinkUpdate::Status(LinkStatus::Dead));
        }
        probes
    }

    /// Returns the link's new status, or `None` when the reply no longer
    /// matches a pooled link.
    pub fn on_reply(
        &mut self,
        links: &mut KeyedList<Link>,
        key: &LinkKey,
        outcome: Result<(), ProbeError>,
        now_ms: i64,
    ) -> Option<LinkStatus> {
        let sent_at_ms = self.in_flight.remove(key)?;
        if !links.contains(key) {
            log::debug!("[links] {key}: reply for removed link dropped");
            return None;
        }

        match outcome {
            Ok(()) => {
                let elapsed = u32::try_from((now_ms - sent_at_ms).max(0)).unwrap_or(u32::MAX);
                links.update_field(key, LinkUpdate::LatencyMs(elapsed));
                links.update_field(key, LinkUpdate::Status(LinkStatus::Alive));
                Some(LinkStatus::Alive)
            }
            Err(error) => {
                log::warn!("[links] {key}: probe failed, marking dead: {error}");
                links.update_field(key, LinkUpdate::Status(LinkStatus::Dead));
                Some(LinkStatus::Dead)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::reconcile::reconcile;

    fn pool() -> Vec<Link> {
        vec![Link::pooling(":8080", "ws://x/y")]
    }

    fn key() -> LinkKey {
        LinkKey::new(":8080", "ws://x/y")
    }

    fn failed() -> Result<(), ProbeError> {
        Err(ProbeError::Timeout(Duration::from_millis(2000)))
    }

    #[test]
    fn link_lifecycle_pooling_alive_dead_and_back() {
        let mut monitor = LinkStatusMonitor::new();
        let mut links = KeyedList::new();
        reconcile(&mut links, pool());

        let probes = monitor.tick(&mut links, 1_000);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].url.as_str(), "http://x/y");
        assert_eq!(
            monitor.on_reply(&mut links, &key(), Ok(()), 1_042),
            Some(LinkStatus::Alive)
        );
        let link = links.find(&key()).unwrap();
        assert_eq!((link.status, link.latency_ms), (LinkStatus::Alive, 42));

        monitor.tick(&mut links, 4_000);
        assert_eq!(
            monitor.on_reply(&mut links, &key(), failed(), 4_100),
            Some(LinkStatus::Dead)
        );
        assert!(monitor.tick(&mut links, 7_000).is_empty());

        reconcile(&mut links, pool());
        assert_eq!(links.find(&key()).map(|link| link.status), Some(LinkStatus::Dead));

        links.clear();
        reconcile(&mut links, pool());
        assert_eq!(links.find(&key()).map(|link| link.status), Some(LinkStatus::Pooling));
        assert_eq!(monitor.tick(&mut links, 10_000).len(), 1);
    }

    #[test]
    fn invalid_target_is_marked_dead_without_probing() {
        let mut monitor = LinkStatusMonitor::new();
        let mut links = KeyedList::new();
        reconcile(
            &mut links,
            vec![Link::pooling(":1", "ftp://x"), Link::pooling(":2", "wss://ok/")],
        );

        let probes = monitor.tick(&mut links, 0);

        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].url.as_str(), "https://ok/");
        let dead = Link::pooling(":1", "ftp://x").key();
        assert_eq!(links.find(&dead).map(|link| link.status), Some(LinkStatus::Dead));
    }

    #[test]
    fn in_flight_links_are_not_probed_twice() {
        let mut monitor = LinkStatusMonitor::new();
        let mut links = KeyedList::new();
        reconcile(&mut links, pool());

        assert_eq!(monitor.tick(&mut links, 0).len(), 1);
        assert!(monitor.tick(&mut links, 100).is_empty());
        assert!(monitor.is_outstanding(&key()));
    }

    #[test]
    fn reply_after_removal_is_dropped() {
        let mut monitor = LinkStatusMonitor::new();
        let mut links = KeyedList::new();
        reconcile(&mut links, pool());
        monitor.tick(&mut links, 0);

        reconcile(&mut links, Vec::new());

        assert_eq!(monitor.on_reply(&mut links, &key(), Ok(()), 10), None);
        assert!(!monitor.is_outstanding(&key()));
    }
}
