//! Agent validation owned by the agent domain.

use super::model::Agent;
use crate::error::ApiError;

/// Validate an agent before registration.
pub fn validate_agent(agent: &Agent) -> Result<(), ApiError> {
    if agent.id.trim().is_empty() {
        return Err(ApiError::ValidationError("agent ID cannot be empty".to_string()));
    }
    if agent.agent_type.trim().is_empty() {
        return Err(ApiError::ValidationError(format!(
            "agent '{}' requires a type",
            agent.id
        )));
    }
    if agent.capabilities.iter().any(|c| c.trim().is_empty()) {
        return Err(ApiError::ValidationError(format!(
            "agent '{}' has an empty capability",
            agent.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::domain::AgentStatus;
    use chrono::Utc;
    use std::collections::HashMap;

    fn agent(id: &str, agent_type: &str) -> Agent {
        Agent {
            id: id.to_string(),
            agent_type: agent_type.to_string(),
            location: String::new(),
            capabilities: vec!["summarize".to_string()],
            metadata: HashMap::new(),
            status: AgentStatus::Unknown,
            tenant_id: "default".to_string(),
            created_at: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn test_validate_agent() {
        assert!(validate_agent(&agent("a1", "ml")).is_ok());
        assert!(validate_agent(&agent("", "ml")).is_err());
        assert!(validate_agent(&agent("a1", " ")).is_err());
    }
}
