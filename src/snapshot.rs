use serde_json::{Map, Value};
use thiserror::Error;

use crate::state::{Connection, Link, Website};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0} snapshot must be a JSON object")]
    Shape(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("pool entry `{id}` has no string field `{field}`")]
    MissingField { id: String, field: &'static str },
    #[error("pool entry `{id}` ({from} -> {to}) has no usable remote key")]
    UnkeyedTunnel { id: String, from: String, to: String },
    #[error("access list `{list}` holds a non-string entry: {value}")]
    InvalidDomain { list: &'static str, value: String },
}

#[derive(Debug)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RecordError>,
}

impl<T> Parsed<T> {
    pub fn log_rejected(&self, tag: &str) {
        for error in &self.rejected {
            log::warn!("[{tag}] skipping snapshot record: {error}");
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolRecord {
    pub id: String,
    pub from: String,
    pub to: String,
}

impl PoolRecord {
    pub fn to_link(&self) -> Link {
        Link::pooling(self.from.clone(), self.to.clone())
    }

    pub fn to_connection(&self) -> Result<Connection, RecordError> {
        Connection::from_tunnel(&self.to, &self.from).ok_or_else(|| RecordError::UnkeyedTunnel {
            id: self.id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
        })
    }
}

fn string_field(
    id: &str,
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<String, RecordError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RecordError::MissingField {
            id: id.to_string(),
            field,
        })
}

/// Parses `GET pool`: `{ "<id>": {"from": "...", "to": "..."}, ... }`.
pub fn parse_pool(body: &[u8]) -> Result<Parsed<PoolRecord>, SnapshotError> {
    let value: Value = serde_json::from_slice(body)?;
    let Value::Object(entries) = value else {
        return Err(SnapshotError::Shape("pool"));
    };

    let mut parsed = Parsed {
        records: Vec::with_capacity(entries.len()),
        rejected: Vec::new(),
    };
    for (id, entry) in &entries {
        let empty = Map::new();
        let object = entry.as_object().unwrap_or(&empty);
        let record = string_field(id, object, "from").and_then(|from| {
            let to = string_field(id, object, "to")?;
            Ok(PoolRecord {
                id: id.clone(),
                from,
                to,
            })
        });
        match record {
            Ok(record) => parsed.records.push(record),
            Err(error) => parsed.rejected.push(error),
        }
    }
    Ok(parsed)
}

pub fn pool_connections(records: &[PoolRecord]) -> Parsed<Connection> {
    let mut parsed = Parsed {
        records: Vec::with_capacity(records.len()),
        rejected: Vec::new(),
    };
    for record in records {
        match record.to_connection() {
            Ok(connection) => parsed.records.push(connection),
            Err(error) => parsed.rejected.push(error),
        }
    }
    parsed
}

/// Parses `GET access`: `{"allowed": [...], "pending": [...]}`. Older daemons
/// name the second list `waitlist`.
pub fn parse_access(body: &[u8]) -> Result<Parsed<Website>, SnapshotError> {
    let value: Value = serde_json::from_slice(body)?;
    let Value::Object(object) = value else {
        return Err(SnapshotError::Shape("access"));
    };

    let mut parsed = Parsed {
        records: Vec::new(),
        rejected: Vec::new(),
    };
    let lists = [
        ("allowed", true),
        ("pending", false),
        ("waitlist", false),
    ];
    for (list, passed) in lists {
        let Some(entries) = object.get(list).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            match entry.as_str() {
                Some(domain) => parsed.records.push(Website::new(domain, passed)),
                None => parsed.rejected.push(RecordError::InvalidDomain {
                    list,
                    value: entry.to_string(),
                }),
            }
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_pool_entries_are_skipped_individually() {
        let body = br#"{
            "127.0.0.1:8080": {"from": "127.0.0.1:8080", "to": "ws://relay/a"},
            "broken": {"from": "127.0.0.1:9090"},
            "odd": 17,
            "127.0.0.1:8081": {"from": "127.0.0.1:8081", "to": "wss://relay/b"}
        }"#;

        let parsed = parse_pool(body).unwrap();

        let froms: Vec<_> = parsed.records.iter().map(|record| record.from.as_str()).collect();
        assert_eq!(froms, ["127.0.0.1:8080", "127.0.0.1:8081"]);
        assert_eq!(
            parsed.rejected,
            vec![
                RecordError::MissingField {
                    id: "broken".into(),
                    field: "to"
                },
                RecordError::MissingField {
                    id: "odd".into(),
                    field: "from"
                },
            ]
        );
    }

    #[test]
    fn non_object_pool_is_rejected_whole() {
        assert!(matches!(parse_pool(b"[1, 2]"), Err(SnapshotError::Shape("pool"))));
        assert!(matches!(parse_pool(b"{nope"), Err(SnapshotError::Decode(_))));
    }

    #[test]
    fn pool_records_map_to_connections_with_derived_keys() {
        let records = vec![
            PoolRecord {
                id: "a".into(),
                from: "127.0.0.1:8080".into(),
                to: "wss://relay.example/t/1".into(),
            },
            PoolRecord {
                id: "b".into(),
                from: "127.0.0.1:8081".into(),
                to: "garbage".into(),
            },
        ];

        let parsed = pool_connections(&records);

        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].remote_key, "relay.example#8080");
        assert_eq!(parsed.records[0].tcp_address, "127.0.0.1:8080");
        assert!(matches!(
            parsed.rejected.as_slice(),
            [RecordError::UnkeyedTunnel { id, .. }] if id == "b"
        ));
    }

    #[test]
    fn access_snapshot_accepts_pending_and_waitlist() {
        let parsed = parse_access(
            br#"{"allowed": ["a.example", 3], "pending": ["b.example"], "waitlist": ["c.example"]}"#,
        )
        .unwrap();

        assert_eq!(
            parsed.records,
            vec![
                Website::new("a.example", true),
                Website::new("b.example", false),
                Website::new("c.example", false),
            ]
        );
        assert_eq!(parsed.rejected.len(), 1);
    }

    #[test]
    fn access_snapshot_with_missing_lists_is_empty() {
        let parsed = parse_access(b"{}").unwrap();
        assert!(parsed.records.is_empty());
        assert!(matches!(parse_access(b"\"x\""), Err(SnapshotError::Shape("access"))));
    }
}
