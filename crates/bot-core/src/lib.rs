//! Client framework for connecting bot agents to an RLBot match server.
//!
//! The crate hides the wire protocol and the concurrency plumbing so an
//! agent author only implements per-tick decision logic: implement
//! [`agent::Agent`], hand a spawner to [`manager::AgentManager::connect`],
//! and the framework routes game packets in and player inputs out over a
//! single long-lived TCP connection.

pub mod agent;
pub mod config;
pub mod launch;
pub mod logging;
pub mod manager;
pub mod pool;
pub mod schema;
pub mod transport;
pub mod wire;

mod worker;

pub use agent::{Agent, AgentIdentity};
pub use manager::{AgentManager, ConnectOptions};
