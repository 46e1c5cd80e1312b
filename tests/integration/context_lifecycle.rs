use std::time::Duration;

use acb::context::{compute_checksum, AccessControl, CreateRequest, Requester, UpdateRequest};
use acb::storage::ContextFilters;
use acb::ApiError;

use crate::integration::support::{in_memory_broker, payload, MIB};

#[tokio::test]
async fn oversized_inline_payload_is_rejected() {
    let broker = in_memory_broker();
    let err = broker
        .manager
        .create(CreateRequest::new("doc", "agent-a", "t1").with_payload(payload(2 * MIB)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::PayloadTooLarge { size, max } if size == 2 * MIB as u64 && max == MIB as u64
    ));
}

#[tokio::test]
async fn payload_at_inline_limit_is_accepted() {
    let broker = in_memory_broker();
    let ctx = broker
        .manager
        .create(CreateRequest::new("doc", "agent-a", "t1").with_payload(payload(MIB)))
        .await
        .unwrap();
    assert_eq!(ctx.checksum, compute_checksum(&payload(MIB)));
}

#[tokio::test]
async fn zero_ttl_defaults_to_a_day() {
    let broker = in_memory_broker();
    let ctx = broker
        .manager
        .create(CreateRequest::new("doc", "agent-a", "t1").with_ttl(Duration::ZERO))
        .await
        .unwrap();
    let expires_at = ctx.expires_at.unwrap();
    assert_eq!(expires_at - ctx.created_at, chrono::Duration::hours(24));
    assert!(!ctx.is_expired_at(expires_at));
    assert!(ctx.is_expired_at(expires_at + chrono::Duration::milliseconds(1)));
}

#[tokio::test]
async fn ttl_only_update_moves_expiry_and_keeps_payload() {
    let broker = in_memory_broker();
    let created = broker
        .manager
        .create(
            CreateRequest::new("doc", "agent-a", "t1")
                .with_payload(b"payload".to_vec())
                .with_ttl(Duration::from_secs(30)),
        )
        .await
        .unwrap();

    let updated = broker
        .manager
        .update(&created.id, UpdateRequest::ttl(Duration::from_secs(120)))
        .await
        .unwrap();
    assert!(updated.expires_at.unwrap() > created.expires_at.unwrap());
    assert_eq!(updated.payload, created.payload);
    assert_eq!(updated.checksum, created.checksum);
}

#[tokio::test]
async fn list_filters_by_tenant_and_type_newest_first() {
    let broker = in_memory_broker();
    let mut expected = Vec::new();
    for (tenant, kind) in [("t1", "doc"), ("t1", "image"), ("t2", "doc"), ("t1", "doc")] {
        let ctx = broker
            .manager
            .create(CreateRequest::new(kind, "agent-a", tenant))
            .await
            .unwrap();
        if tenant == "t1" && kind == "doc" {
            expected.push(ctx.id);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    expected.reverse();

    let listed = broker
        .manager
        .list(&ContextFilters::for_tenant("t1").with_type("doc"))
        .await
        .unwrap();
    let ids: Vec<String> = listed.into_iter().map(|c| c.id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn read_gate_follows_scope() {
    let broker = in_memory_broker();
    let owner = Requester::new("agent-a", "t1");
    let peer = Requester::new("agent-b", "t1");
    let outsider = Requester::new("agent-b", "t2");

    let public = broker
        .manager
        .create(CreateRequest::new("doc", "agent-a", "t1").with_access(AccessControl::public()))
        .await
        .unwrap();
    let private = broker
        .manager
        .create(CreateRequest::new("doc", "agent-a", "t1"))
        .await
        .unwrap();
    let group = broker
        .manager
        .create(
            CreateRequest::new("doc", "agent-a", "t1").with_access(AccessControl::group(["agent-b"])),
        )
        .await
        .unwrap();

    assert!(broker.manager.get_as(&peer, &public.id).await.is_ok());
    assert!(broker.manager.get_as(&owner, &private.id).await.is_ok());
    assert!(matches!(
        broker.manager.get_as(&peer, &private.id).await,
        Err(ApiError::Forbidden(_))
    ));
    assert!(broker.manager.get_as(&peer, &group.id).await.is_ok());
    assert!(broker
        .manager
        .get_as(&outsider, &public.id)
        .await
        .unwrap_err()
        .is_not_found());

    // Only the creator may write.
    assert!(matches!(
        broker.manager.delete_as(&peer, &group.id).await,
        Err(ApiError::Forbidden(_))
    ));
    broker.manager.delete_as(&owner, &group.id).await.unwrap();
}

#[tokio::test]
async fn access_replacement_is_whole_value() {
    let broker = in_memory_broker();
    let created = broker
        .manager
        .create(
            CreateRequest::new("doc", "agent-a", "t1")
                .with_access(AccessControl::shared(["agent-b", "agent-c"])),
        )
        .await
        .unwrap();

    let updated = broker
        .manager
        .update(
            &created.id,
            UpdateRequest {
                access_control: Some(AccessControl::private()),
                ..UpdateRequest::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.access_control.allowed_ids.is_empty());

    // A group scope without readers is rejected rather than silently stored.
    let err = broker
        .manager
        .update(
            &created.id,
            UpdateRequest {
                access_control: Some(AccessControl::group(Vec::<String>::new())),
                ..UpdateRequest::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}
