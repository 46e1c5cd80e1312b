//! Agents known to the broker: entity, validation and the registry service.

pub mod domain;
pub mod registry;

pub use domain::{validate_agent, Agent, AgentStatus};
pub use registry::{AgentRegistration, AgentRegistry};
