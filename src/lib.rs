//! Client-side bookkeeping for a wsrx tunnel daemon: mirrors the daemon's
//! pool and access lists into observable keyed lists and tracks the
//! reachability of every tunnel endpoint.

pub mod app;
pub mod configuration;
pub mod daemon_api;
pub mod heartbeat;
pub mod keyed_list;
pub mod link_monitor;
pub mod probe;
pub mod reachability;
pub mod reconcile;
pub mod snapshot;
pub mod state;
