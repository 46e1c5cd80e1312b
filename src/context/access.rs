//! Read/write authorization over a context's access policy.
//!
//! Pure decisions over `(requester, context)`; the manager evaluates them before
//! handing a context to a caller.

use super::model::{Context, Scope};
use crate::error::ApiError;
use crate::types::{AgentID, TenantID};
use serde::{Deserialize, Serialize};

/// Identity on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub agent_id: AgentID,
    pub tenant_id: TenantID,
}

impl Requester {
    pub fn new(agent_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

/// Whether `requester` may read `context`.
pub fn can_read(requester: &Requester, context: &Context) -> bool {
    if requester.tenant_id != context.tenant_id {
        return false;
    }
    match context.access_control.scope {
        Scope::Public => true,
        Scope::Private => requester.agent_id == context.agent_id,
        Scope::Group | Scope::Shared => {
            requester.agent_id == context.agent_id
                || context.access_control.allows(&requester.agent_id)
        }
    }
}

/// Whether `requester` may modify `context`: only its creator, within the tenant.
pub fn can_write(requester: &Requester, context: &Context) -> bool {
    requester.tenant_id == context.tenant_id && requester.agent_id == context.agent_id
}

/// Gate a read.
///
/// Cross-tenant requests report `NotFound` so the context's existence is not
/// disclosed outside its tenant.
pub fn authorize_read(requester: &Requester, context: &Context) -> Result<(), ApiError> {
    check_identity(requester)?;
    if requester.tenant_id != context.tenant_id {
        return Err(ApiError::NotFound(format!("context {}", context.id)));
    }
    if !can_read(requester, context) {
        return Err(ApiError::Forbidden(format!(
            "agent {} cannot read {} context {}",
            requester.agent_id, context.access_control.scope, context.id
        )));
    }
    Ok(())
}

/// Gate a write.
pub fn authorize_write(requester: &Requester, context: &Context) -> Result<(), ApiError> {
    check_identity(requester)?;
    if requester.tenant_id != context.tenant_id {
        return Err(ApiError::NotFound(format!("context {}", context.id)));
    }
    if !can_write(requester, context) {
        return Err(ApiError::Forbidden(format!(
            "agent {} is not the creator of context {}",
            requester.agent_id, context.id
        )));
    }
    Ok(())
}

fn check_identity(requester: &Requester) -> Result<(), ApiError> {
    if requester.agent_id.trim().is_empty() {
        return Err(ApiError::Unauthorized("requester identity is missing".to_string()));
    }
    Ok(())
}
