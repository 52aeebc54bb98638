//! Vane Dynamic DNS Control Plane
//!
//! Vane keeps a set of DNS records converged with the addresses a host
//! actually owns. It is split into two cooperating halves:
//!
//! * An agent that watches local network interfaces, filters the observed
//!   addresses through per-set rules, and pushes update batches to a server
//!   whenever the result changes.
//! * A server that authenticates each batch by `(role, token)`, checks every
//!   operation against that role's domain delegations, and replays the batch
//!   onto the responsible provider registries.
//!
//! # Architecture
//!
//! The crate is divided into four modules:
//! * `ddns` - Shared control-plane logic: data model, configuration store,
//!   authorization, and the execution planner
//! * `web` - The server's HTTP API
//! * `agent` - The client agent: address evaluation, change triggers, and
//!   submission
//! * `providers` - Concrete registry implementations

/// Control-plane core shared by server and agent
pub mod ddns;

/// HTTP API for the record server
pub mod web;

/// Client agent: interface watching and reconciliation
pub mod agent;

/// Concrete provider registries
pub mod providers;
