//! Deployment module

pub mod deployment;
pub mod fsm;
pub mod meta;

pub use deployment::{Deployment, DeploymentFactory, OpenMode};
pub use fsm::{Action, DeploymentState, FsmSettings};
