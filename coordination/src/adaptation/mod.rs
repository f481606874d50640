//! Structural adaptation of the swarm
//!
//! - [`roles`]: capability-driven role assignment and periodic reassignment
//! - [`load_balancer`]: backlog redistribution from overloaded to idle workers

pub mod load_balancer;
pub mod roles;

pub use load_balancer::{LoadBalancer, Transfer};
pub use roles::{RoleChange, RoleManager, RoleScores};
