use std::cmp::Ordering;

use reqwest::Url;

use crate::keyed_list::{Entity, Field, FieldValue};

pub const UNMEASURED_LATENCY: i64 = -1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub remote_key: String,
    pub ws_address: String,
    pub tcp_address: String,
    pub latency_ms: i64,
}

impl Connection {
    pub fn new(remote_key: String, ws_address: String, tcp_address: String) -> Self {
        Self {
            remote_key,
            ws_address,
            tcp_address,
            latency_ms: UNMEASURED_LATENCY,
        }
    }

    pub fn from_tunnel(ws_address: &str, tcp_address: &str) -> Option<Self> {
        let remote_key = derive_remote_key(ws_address, tcp_address)?;
        Some(Self::new(
            remote_key,
            ws_address.to_string(),
            tcp_address.to_string(),
        ))
    }

    pub fn is_measured(&self) -> bool {
        self.latency_ms >= 0
    }
}

/// `<websocket host>#<local tcp port>`, e.g. `example.com#8080`.
pub fn derive_remote_key(ws_address: &str, tcp_address: &str) -> Option<String> {
    let url = Url::parse(ws_address).ok()?;
    let host = url.host_str().filter(|host| !host.is_empty())?;
    let (_, port) = tcp_address.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some(format!("{host}#{port}"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionField {
    RemoteKey,
    WsAddress,
    TcpAddress,
    LatencyMs,
}

impl Field for ConnectionField {
    fn name(self) -> &'static str {
        match self {
            Self::RemoteKey => "remoteKey",
            Self::WsAddress => "wsAddress",
            Self::TcpAddress => "tcpAddress",
            Self::LatencyMs => "latencyMs",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionUpdate {
    WsAddress(String),
    TcpAddress(String),
    LatencyMs(i64),
}

impl Entity for Connection {
    type Key = String;
    type Field = ConnectionField;
    type Update = ConnectionUpdate;

    const FIELDS: &'static [ConnectionField] = &[
        ConnectionField::RemoteKey,
        ConnectionField::WsAddress,
        ConnectionField::TcpAddress,
        ConnectionField::LatencyMs,
    ];

    fn key(&self) -> String {
        self.remote_key.clone()
    }

    fn has_key(&self, key: &String) -> bool {
        self.remote_key == *key
    }

    fn value(&self, field: ConnectionField) -> FieldValue<'_> {
        match field {
            ConnectionField::RemoteKey => FieldValue::Text(&self.remote_key),
            ConnectionField::WsAddress => FieldValue::Text(&self.ws_address),
            ConnectionField::TcpAddress => FieldValue::Text(&self.tcp_address),
            ConnectionField::LatencyMs => FieldValue::Integer(self.latency_ms),
        }
    }

    fn apply(&mut self, update: ConnectionUpdate) -> ConnectionField {
        match update {
            ConnectionUpdate::WsAddress(address) => {
                self.ws_address = address;
                ConnectionField::WsAddress
            }
            ConnectionUpdate::TcpAddress(address) => {
                self.tcp_address = address;
                ConnectionField::TcpAddress
            }
            ConnectionUpdate::LatencyMs(latency) => {
                self.latency_ms = latency;
                ConnectionField::LatencyMs
            }
        }
    }

    fn snapshot_updates(&self, fresh: &Self) -> Vec<ConnectionUpdate> {
        let mut updates = Vec::new();
        if self.ws_address != fresh.ws_address {
            updates.push(ConnectionUpdate::WsAddress(fresh.ws_address.clone()));
        }
        if self.tcp_address != fresh.tcp_address {
            updates.push(ConnectionUpdate::TcpAddress(fresh.tcp_address.clone()));
        }
        updates
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkStatus {
    Pooling,
    Alive,
    Dead,
}

impl LinkStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pooling => "pooling",
            Self::Alive => "alive",
            Self::Dead => "dead",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub from: String,
    pub to: String,
}

impl LinkKey {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl std::fmt::Display for LinkKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} <-> {}", self.from, self.to)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub from: String,
    pub to: String,
    pub status: LinkStatus,
    pub latency_ms: u32,
}

impl Link {
    pub fn pooling(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            status: LinkStatus::Pooling,
            latency_ms: 0,
        }
    }
}

impl Ord for Link {
    fn cmp(&self, other: &Self) -> Ordering {
        self.status
            .cmp(&other.status)
            .then_with(|| self.latency_ms.cmp(&other.latency_ms))
            .then_with(|| self.from.cmp(&other.from))
            .then_with(|| self.to.cmp(&other.to))
    }
}

impl PartialOrd for Link {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkField {
    From,
    To,
    Status,
    LatencyMs,
}

impl Field for LinkField {
    fn name(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
            Self::Status => "status",
            Self::LatencyMs => "latency",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkUpdate {
    Status(LinkStatus),
    LatencyMs(u32),
}

impl Entity for Link {
    type Key = LinkKey;
    type Field = LinkField;
    type Update = LinkUpdate;

    const FIELDS: &'static [LinkField] = &[
        LinkField::From,
        LinkField::To,
        LinkField::Status,
        LinkField::LatencyMs,
    ];

    fn key(&self) -> LinkKey {
        LinkKey::new(self.from.clone(), self.to.clone())
    }

    fn has_key(&self, key: &LinkKey) -> bool {
        self.from == key.from && self.to == key.to
    }

    fn value(&self, field: LinkField) -> FieldValue<'_> {
        match field {
            LinkField::From => FieldValue::Text(&self.from),
            LinkField::To => FieldValue::Text(&self.to),
            LinkField::Status => FieldValue::Status(self.status),
            LinkField::LatencyMs => FieldValue::Integer(i64::from(self.latency_ms)),
        }
    }

    fn apply(&mut self, update: LinkUpdate) -> LinkField {
        match update {
            LinkUpdate::Status(status) => {
                self.status = status;
                LinkField::Status
            }
            LinkUpdate::LatencyMs(latency) => {
                self.latency_ms = latency;
                LinkField::LatencyMs
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Website {
    pub domain: String,
    pub passed: bool,
}

impl Website {
    pub fn new(domain: impl Into<String>, passed: bool) -> Self {
        Self {
            domain: domain.into(),
            passed,
        }
    }
}

// Pending origins sort ahead of allowed ones.
impl Ord for Website {
    fn cmp(&self, other: &Self) -> Ordering {
        self.passed
            .cmp(&other.passed)
            .then_with(|| self.domain.cmp(&other.domain))
    }
}

impl PartialOrd for Website {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WebsiteField {
    Domain,
    Passed,
}

impl Field for WebsiteField {
    fn name(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Passed => "passed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebsiteUpdate {
    Passed(bool),
}

impl Entity for Website {
    type Key = String;
    type Field = WebsiteField;
    type Update = WebsiteUpdate;

    const FIELDS: &'static [WebsiteField] = &[WebsiteField::Domain, WebsiteField::Passed];

    fn key(&self) -> String {
        self.domain.clone()
    }

    fn has_key(&self, key: &String) -> bool {
        self.domain == *key
    }

    fn value(&self, field: WebsiteField) -> FieldValue<'_> {
        match field {
            WebsiteField::Domain => FieldValue::Text(&self.domain),
            WebsiteField::Passed => FieldValue::Flag(self.passed),
        }
    }

    fn apply(&mut self, update: WebsiteUpdate) -> WebsiteField {
        match update {
            WebsiteUpdate::Passed(passed) => {
                self.passed = passed;
                WebsiteField::Passed
            }
        }
    }

    fn snapshot_updates(&self, fresh: &Self) -> Vec<WebsiteUpdate> {
        if self.passed == fresh.passed {
            Vec::new()
        } else {
            vec![WebsiteUpdate::Passed(fresh.passed)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_key_uses_websocket_host_and_local_port() {
        assert_eq!(
            derive_remote_key("wss://relay.example.com/ws/abc", "127.0.0.1:8080").as_deref(),
            Some("relay.example.com#8080")
        );
        assert_eq!(
            derive_remote_key("ws://10.0.0.2:9000/", "0.0.0.0:31337").as_deref(),
            Some("10.0.0.2#31337")
        );
        assert_eq!(derive_remote_key("not a url", "127.0.0.1:8080"), None);
        assert_eq!(derive_remote_key("ws://x/y", "127.0.0.1"), None);
    }

    #[test]
    fn new_connection_is_unmeasured() {
        let connection = Connection::from_tunnel("ws://x/y", "127.0.0.1:1234").unwrap();
        assert_eq!(connection.remote_key, "x#1234");
        assert_eq!(connection.latency_ms, UNMEASURED_LATENCY);
        assert!(!connection.is_measured());
    }

    #[test]
    fn links_order_by_status_then_latency_then_endpoints() {
        let mut dead = Link::pooling(":1", "ws://a");
        dead.status = LinkStatus::Dead;
        let mut fast = Link::pooling(":9", "ws://z");
        fast.status = LinkStatus::Alive;
        fast.latency_ms = 5;
        let mut slow = Link::pooling(":1", "ws://a");
        slow.status = LinkStatus::Alive;
        slow.latency_ms = 80;
        let pooling_b = Link::pooling(":2", "ws://b");
        let pooling_a = Link::pooling(":2", "ws://a");

        let mut links = vec![
            dead.clone(),
            slow.clone(),
            pooling_b.clone(),
            fast.clone(),
            pooling_a.clone(),
        ];
        links.sort();
        assert_eq!(links, vec![pooling_a, pooling_b, fast, slow, dead]);
    }

    #[test]
    fn typed_fields_expose_values_by_name() {
        let mut link = Link::pooling(":8080", "ws://x/y");
        let names: Vec<_> = Link::FIELDS.iter().map(|field| field.name()).collect();
        assert_eq!(names, ["from", "to", "status", "latency"]);

        assert_eq!(link.apply(LinkUpdate::LatencyMs(42)), LinkField::LatencyMs);
        assert_eq!(link.value(LinkField::LatencyMs), FieldValue::Integer(42));
        assert_eq!(
            link.value(LinkField::Status),
            FieldValue::Status(LinkStatus::Pooling)
        );
    }

    #[test]
    fn website_refresh_only_touches_changed_flag() {
        let pending = Website::new("ctf.example.org", false);
        assert!(pending.snapshot_updates(&pending.clone()).is_empty());
        assert_eq!(
            pending.snapshot_updates(&Website::new("ctf.example.org", true)),
            vec![WebsiteUpdate::Passed(true)]
        );
    }
}
