//! uptomate library
//!
//! Lifecycle engine for container-compose backed training environments:
//! deployments shell out to a compose backend, lifecycle actions run as
//! asynchronous tasks serialized per deployment, and bulk policies start or
//! stop many deployments based on their predicted state.

pub mod app;
pub mod backend;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod policy;
pub mod problems;
pub mod provider;
pub mod server;
pub mod storage;
pub mod tasks;
pub mod utils;
pub mod workers;
