//! Structural validation of contexts and access policies.

use super::model::{compute_checksum, AccessControl, Context};
use crate::error::ApiError;

/// Validate an access policy.
///
/// Group and shared scopes must name at least one reader; public and private
/// ignore `allowed_ids`.
pub fn validate_access_control(access_control: &AccessControl) -> Result<(), ApiError> {
    if access_control.scope.requires_allow_list() && access_control.allowed_ids.is_empty() {
        return Err(ApiError::ValidationError(format!(
            "{} scope requires allowed_ids",
            access_control.scope
        )));
    }
    if access_control.allowed_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ApiError::ValidationError(
            "allowed_ids cannot contain empty agent IDs".to_string(),
        ));
    }
    Ok(())
}

/// Validate a context before it is persisted.
pub fn validate_context(context: &Context, max_inline_payload: u64) -> Result<(), ApiError> {
    if context.id.trim().is_empty() {
        return Err(ApiError::ValidationError("context ID cannot be empty".to_string()));
    }
    if context.context_type.trim().is_empty() {
        return Err(ApiError::ValidationError("context type cannot be empty".to_string()));
    }
    if context.agent_id.trim().is_empty() {
        return Err(ApiError::ValidationError("agent ID cannot be empty".to_string()));
    }
    if context.tenant_id.contains('.') {
        return Err(ApiError::ValidationError(format!(
            "tenant ID '{}' cannot contain '.'",
            context.tenant_id
        )));
    }

    let inline_len = context.payload.len() as u64;
    if inline_len > max_inline_payload {
        return Err(ApiError::PayloadTooLarge {
            size: inline_len,
            max: max_inline_payload,
        });
    }
    if inline_len > 0 && context.payload_ref.is_some() {
        return Err(ApiError::ValidationError(
            "payload and payload_ref are mutually exclusive".to_string(),
        ));
    }
    if context.payload_ref.is_none() && context.checksum != compute_checksum(&context.payload) {
        return Err(ApiError::ValidationError(format!(
            "checksum does not match payload of context {}",
            context.id
        )));
    }

    validate_access_control(&context.access_control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::model::{PayloadRef, Scope};
    use chrono::Utc;
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashMap};

    const MAX: u64 = 1024 * 1024;

    fn context_with(payload: Vec<u8>) -> Context {
        Context {
            id: "c1".to_string(),
            context_type: "doc".to_string(),
            agent_id: "agent-a".to_string(),
            tenant_id: "t1".to_string(),
            checksum: compute_checksum(&payload),
            payload,
            payload_ref: None,
            metadata: HashMap::new(),
            version: String::new(),
            schema_id: None,
            ttl_secs: 60,
            access_control: AccessControl::private(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_valid_context_passes() {
        assert!(validate_context(&context_with(b"data".to_vec()), MAX).is_ok());
    }

    #[test]
    fn test_missing_type_and_agent_rejected() {
        let mut ctx = context_with(vec![]);
        ctx.context_type = String::new();
        assert!(matches!(validate_context(&ctx, MAX), Err(ApiError::ValidationError(_))));

        let mut ctx = context_with(vec![]);
        ctx.agent_id = "  ".to_string();
        assert!(matches!(validate_context(&ctx, MAX), Err(ApiError::ValidationError(_))));
    }

    #[test]
    fn test_oversized_inline_payload_rejected() {
        let ctx = context_with(vec![0u8; (MAX + 1) as usize]);
        match validate_context(&ctx, MAX) {
            Err(ApiError::PayloadTooLarge { size, max }) => {
                assert_eq!(size, MAX + 1);
                assert_eq!(max, MAX);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_and_ref_are_exclusive() {
        let mut ctx = context_with(b"inline".to_vec());
        ctx.payload_ref = Some(PayloadRef {
            backend: "memory".to_string(),
            bucket: "streams".to_string(),
            key: "k".to_string(),
            size: 10,
        });
        assert!(matches!(validate_context(&ctx, MAX), Err(ApiError::ValidationError(_))));
    }

    #[test]
    fn test_stale_checksum_rejected() {
        let mut ctx = context_with(b"one".to_vec());
        ctx.payload = b"two".to_vec();
        assert!(matches!(validate_context(&ctx, MAX), Err(ApiError::ValidationError(_))));
    }

    fn scope_strategy() -> impl Strategy<Value = Scope> {
        prop_oneof![
            Just(Scope::Public),
            Just(Scope::Private),
            Just(Scope::Group),
            Just(Scope::Shared),
        ]
    }

    proptest! {
        #[test]
        fn prop_access_control_fails_iff_allow_list_scope_is_empty(
            scope in scope_strategy(),
            ids in proptest::collection::btree_set("[a-z]{1,8}", 0..4),
        ) {
            let ac = AccessControl { scope, allowed_ids: ids.clone() };
            let expect_err = matches!(scope, Scope::Group | Scope::Shared) && ids.is_empty();
            prop_assert_eq!(validate_access_control(&ac).is_err(), expect_err);
        }
    }

    #[test]
    fn test_public_and_private_ignore_allowed_ids() {
        for scope in [Scope::Public, Scope::Private] {
            let ac = AccessControl {
                scope,
                allowed_ids: BTreeSet::from(["x".to_string()]),
            };
            assert!(validate_access_control(&ac).is_ok());
        }
    }
}
