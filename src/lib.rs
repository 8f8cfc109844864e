//! # gcache-proxy
//!
//! A transparent proxy for a sharded Redis cluster. Clients talk to it as if
//! it were a single node; it decodes each request, refuses commands that
//! would expose topology or block, optionally prefixes keys with a tenant
//! namespace, forwards the command to the cluster and re-encodes the reply in
//! the wire shape the command's clients expect.

pub mod cluster;
pub mod config;
pub mod discovery;
pub mod error;
pub mod monitor;
pub mod policy;
pub mod reply;
pub mod resp;
pub mod server;
pub mod session;
