pub mod model;
pub mod validation;

pub use model::{Agent, AgentStatus};
pub use validation::validate_agent;
