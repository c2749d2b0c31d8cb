//! A federated, line-oriented chat server.
//!
//! Clients register a nickname, join `#channels` and exchange messages;
//! servers link to each other over a second port and mirror nicknames,
//! memberships and messages across the mesh.

pub mod config;
mod connection;
pub mod dial;
pub mod error;
pub mod framer;
pub mod hub;
pub mod registry;
mod s2s;
pub mod server;
pub mod wire;
