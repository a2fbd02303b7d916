//! Drone Combat - authoritative combat and replication core
//!
//! The simulation (`sim`) owns entities, damage and projectiles; `net`
//! carries its state changes between the host and clients; `session`
//! drives a headless host with bots and in-process spectators.

pub mod config;
pub mod net;
pub mod session;
pub mod sim;
pub mod util;
