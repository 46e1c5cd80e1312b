//! Context Lifecycle Manager
//!
//! Orchestrates create/get/update/delete/list/expire against the persistence
//! contract. Holds no context state of its own: every operation reads and
//! writes through the store, so concurrent calls on different ids proceed
//! independently. Read-modify-write on the same id is serialized per id.

use super::access::{authorize_read, authorize_write, can_read, Requester};
use super::events::{ChangeAnnouncer, ContextEvent};
use super::model::{compute_checksum, expiration_from, AccessControl, Context, PayloadRef};
use super::requests::{CreateRequest, UpdateRequest};
use super::validation::{validate_access_control, validate_context};
use crate::concurrency::KeyedLocks;
use crate::config::{BrokerConfig, LimitsConfig, PaginationConfig, TtlConfig};
use crate::error::ApiError;
use crate::storage::{BlobStore, ContextFilters, ContextStore};
use crate::types::new_id;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bucket that externally stored payloads are written to.
pub const PAYLOAD_BUCKET: &str = "contexts";

/// Context lifecycle operations
pub struct ContextManager {
    store: Arc<dyn ContextStore>,
    blobs: Option<Arc<dyn BlobStore>>,
    announcer: Option<ChangeAnnouncer>,
    limits: LimitsConfig,
    ttl: TtlConfig,
    pagination: PaginationConfig,
    default_tenant: String,
    locks: KeyedLocks,
}

impl ContextManager {
    pub fn new(store: Arc<dyn ContextStore>, config: &BrokerConfig) -> Self {
        Self {
            store,
            blobs: None,
            announcer: None,
            limits: config.limits.clone(),
            ttl: config.ttl.clone(),
            pagination: config.pagination.clone(),
            default_tenant: config.router.tenant_id.clone(),
            locks: KeyedLocks::new(),
        }
    }

    /// Store payloads above the inline ceiling in `blobs` (required for streamed contexts).
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Broadcast create/update/delete events.
    pub fn with_announcer(mut self, announcer: ChangeAnnouncer) -> Self {
        self.announcer = Some(announcer);
        self
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Create a context with an inline payload.
    ///
    /// Assigns an id if absent, computes checksum and expiry, validates and
    /// persists. Payloads above the inline ceiling fail with `PayloadTooLarge`;
    /// those must go through the chunk transfer engine.
    pub async fn create(&self, request: CreateRequest) -> Result<Context, ApiError> {
        let context = self.build(request, Utc::now());
        validate_context(&context, self.limits.max_inline_payload)?;
        self.persist_new(context).await
    }

    /// Create a context from a fully reassembled stream.
    ///
    /// Payloads within the inline ceiling are stored inline; larger ones go to
    /// the blob store and the context carries a `payload_ref`.
    pub async fn create_streamed(&self, request: CreateRequest) -> Result<Context, ApiError> {
        let size = request.payload.len() as u64;
        if size > self.limits.max_stream_payload {
            return Err(ApiError::PayloadTooLarge {
                size,
                max: self.limits.max_stream_payload,
            });
        }
        if size <= self.limits.max_inline_payload {
            return self.create(request).await;
        }

        let blobs = self.blobs.as_ref().ok_or_else(|| {
            ApiError::ConfigError(
                "No blob store configured for payloads above the inline limit".to_string(),
            )
        })?;

        let mut context = self.build(request, Utc::now());
        let payload = std::mem::take(&mut context.payload);
        // Validate the record shape before writing any bytes out.
        let mut probe = context.clone();
        probe.checksum = compute_checksum(&[]);
        validate_context(&probe, self.limits.max_inline_payload)?;

        let reference = blobs
            .put(PAYLOAD_BUCKET, &context.id, &payload)
            .await
            .map_err(|e| ApiError::from_storage(e, "payload", &context.id))?;
        context.payload_ref = Some(reference.clone());

        match self.persist_new(context).await {
            Ok(context) => Ok(context),
            Err(e) => {
                if let Err(cleanup) = blobs.delete(&reference).await {
                    warn!(key = %reference.key, error = %cleanup, "Failed to remove orphaned payload");
                }
                Err(e)
            }
        }
    }

    fn build(&self, request: CreateRequest, now: DateTime<Utc>) -> Context {
        let id = match request.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => new_id(),
        };
        let tenant_id = if request.tenant_id.is_empty() {
            self.default_tenant.clone()
        } else {
            request.tenant_id
        };
        let ttl = if request.ttl.is_zero() {
            self.ttl.context_ttl()
        } else {
            request.ttl
        };

        Context {
            id,
            context_type: request.context_type,
            agent_id: request.agent_id,
            tenant_id,
            checksum: compute_checksum(&request.payload),
            payload: request.payload,
            payload_ref: None,
            metadata: request.metadata,
            version: request.version,
            schema_id: request.schema_id.filter(|s| !s.is_empty()),
            ttl_secs: ttl.as_secs(),
            access_control: request.access_control,
            created_at: now,
            expires_at: expiration_from(now, ttl),
        }
    }

    async fn persist_new(&self, context: Context) -> Result<Context, ApiError> {
        self.store
            .create(&context)
            .await
            .map_err(|e| ApiError::from_storage(e, "context", &context.id))?;

        debug!(
            context_id = %context.id,
            context_type = %context.context_type,
            agent_id = %context.agent_id,
            size = context.payload_size(),
            "Created context"
        );
        self.announce(ContextEvent::Created, &context).await;
        Ok(context)
    }

    /// Fetch a context by id.
    ///
    /// Does not filter expired rows: callers check `is_expired()`.
    pub async fn get(&self, context_id: &str) -> Result<Context, ApiError> {
        self.store
            .get(context_id)
            .await
            .map_err(|e| ApiError::from_storage(e, "context", context_id))
    }

    /// Fetch a context on behalf of `requester`, enforcing its access scope.
    ///
    /// A logically expired context is reported as `NotFound` even if it has
    /// not been swept yet.
    pub async fn get_as(&self, requester: &Requester, context_id: &str) -> Result<Context, ApiError> {
        let context = self.get(context_id).await?;
        authorize_read(requester, &context)?;
        if context.is_expired() {
            return Err(ApiError::NotFound(format!("context {} (expired)", context_id)));
        }
        Ok(context)
    }

    /// Apply a partial update.
    pub async fn update(&self, context_id: &str, request: UpdateRequest) -> Result<Context, ApiError> {
        let _guard = self.locks.lock(context_id).await;
        let current = self.get(context_id).await?;
        self.apply_update(current, request).await
    }

    /// Apply a partial update on behalf of `requester` (creator only).
    pub async fn update_as(
        &self,
        requester: &Requester,
        context_id: &str,
        request: UpdateRequest,
    ) -> Result<Context, ApiError> {
        let _guard = self.locks.lock(context_id).await;
        let current = self.get(context_id).await?;
        authorize_write(requester, &current)?;
        self.apply_update(current, request).await
    }

    async fn apply_update(&self, current: Context, request: UpdateRequest) -> Result<Context, ApiError> {
        let now = Utc::now();
        let mut context = current.clone();
        let replaced_ref = match request.payload {
            Some(payload) if !payload.is_empty() => {
                let old_ref = context.payload_ref.take();
                context.set_payload(payload);
                old_ref
            }
            _ => None,
        };
        if let Some(metadata) = request.metadata {
            context.metadata = metadata;
        }
        if let Some(version) = request.version.filter(|v| !v.is_empty()) {
            context.version = version;
        }
        if let Some(access_control) = request.access_control {
            context.access_control = access_control;
        }
        if let Some(ttl) = request.ttl.filter(|ttl| !ttl.is_zero()) {
            context.ttl_secs = ttl.as_secs();
            context.expires_at = expiration_from(now, ttl);
        }

        validate_context(&context, self.limits.max_inline_payload)?;
        self.store
            .update(&context)
            .await
            .map_err(|e| ApiError::from_storage(e, "context", &context.id))?;

        if let Some(reference) = replaced_ref {
            self.remove_blob(&context.id, &reference).await;
        }

        debug!(context_id = %context.id, "Updated context");
        self.announce(ContextEvent::Updated, &context).await;
        Ok(context)
    }

    /// Add `agent_id` to the allow list without touching the scope.
    pub async fn grant_access(
        &self,
        requester: &Requester,
        context_id: &str,
        agent_id: &str,
    ) -> Result<Context, ApiError> {
        if agent_id.trim().is_empty() {
            return Err(ApiError::ValidationError("agent ID cannot be empty".to_string()));
        }
        self.edit_allow_list(requester, context_id, |ac| {
            ac.allowed_ids.insert(agent_id.to_string());
        })
        .await
    }

    /// Remove `agent_id` from the allow list without touching the scope.
    ///
    /// Removing the last reader of a group/shared context fails validation.
    pub async fn revoke_access(
        &self,
        requester: &Requester,
        context_id: &str,
        agent_id: &str,
    ) -> Result<Context, ApiError> {
        self.edit_allow_list(requester, context_id, |ac| {
            ac.allowed_ids.remove(agent_id);
        })
        .await
    }

    async fn edit_allow_list<F>(
        &self,
        requester: &Requester,
        context_id: &str,
        edit: F,
    ) -> Result<Context, ApiError>
    where
        F: FnOnce(&mut AccessControl),
    {
        let _guard = self.locks.lock(context_id).await;
        let current = self.get(context_id).await?;
        authorize_write(requester, &current)?;

        let mut access_control = current.access_control.clone();
        edit(&mut access_control);
        validate_access_control(&access_control)?;

        let request = UpdateRequest {
            access_control: Some(access_control),
            ..UpdateRequest::default()
        };
        self.apply_update(current, request).await
    }

    /// Remove a context by id.
    pub async fn delete(&self, context_id: &str) -> Result<(), ApiError> {
        let removed = self
            .store
            .delete(context_id)
            .await
            .map_err(|e| ApiError::from_storage(e, "context", context_id))?;
        self.after_delete(&removed).await;
        Ok(())
    }

    /// Remove a context on behalf of `requester` (creator only).
    pub async fn delete_as(&self, requester: &Requester, context_id: &str) -> Result<(), ApiError> {
        let _guard = self.locks.lock(context_id).await;
        let current = self.get(context_id).await?;
        authorize_write(requester, &current)?;
        self.delete(context_id).await
    }

    async fn after_delete(&self, removed: &Context) {
        if let Some(reference) = &removed.payload_ref {
            self.remove_blob(&removed.id, reference).await;
        }
        debug!(context_id = %removed.id, "Deleted context");
        self.announce(ContextEvent::Deleted, removed).await;
    }

    /// List contexts matching `filters`, newest first. A zero limit uses the
    /// default page size; limits above the maximum are clamped.
    pub async fn list(&self, filters: &ContextFilters) -> Result<Vec<Context>, ApiError> {
        let mut filters = filters.clone();
        filters.limit = self.pagination.clamp(filters.limit);
        self.store
            .list(&filters)
            .await
            .map_err(ApiError::StorageError)
    }

    /// List the contexts `requester` may read: confined to its tenant, with
    /// unreadable and logically expired rows left out.
    pub async fn list_as(
        &self,
        requester: &Requester,
        filters: &ContextFilters,
    ) -> Result<Vec<Context>, ApiError> {
        if requester.agent_id.trim().is_empty() {
            return Err(ApiError::Unauthorized("requester identity is missing".to_string()));
        }
        let limit = self.pagination.clamp(filters.limit);
        let scoped = ContextFilters {
            tenant_id: Some(requester.tenant_id.clone()),
            limit: 0,
            offset: 0,
            ..filters.clone()
        };
        let now = Utc::now();
        let visible = self
            .store
            .list(&scoped)
            .await
            .map_err(ApiError::StorageError)?
            .into_iter()
            .filter(|c| can_read(requester, c) && !c.is_expired_at(now))
            .skip(filters.offset)
            .take(limit)
            .collect();
        Ok(visible)
    }

    /// Sweep contexts whose expiry has passed; returns how many were removed.
    pub async fn delete_expired(&self) -> Result<usize, ApiError> {
        let removed = self
            .store
            .delete_expired(Utc::now())
            .await
            .map_err(ApiError::StorageError)?;

        for context in &removed {
            if let Some(reference) = &context.payload_ref {
                self.remove_blob(&context.id, reference).await;
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "Removed expired contexts");
        }
        Ok(removed.len())
    }

    /// Resolve a context's payload bytes, inline or referenced, verifying the checksum.
    pub async fn fetch_payload(&self, context: &Context) -> Result<Vec<u8>, ApiError> {
        let payload = match &context.payload_ref {
            None => context.payload.clone(),
            Some(reference) => {
                let blobs = self.blobs.as_ref().ok_or_else(|| {
                    ApiError::ConfigError(format!(
                        "context {} references external payload but no blob store is configured",
                        context.id
                    ))
                })?;
                blobs
                    .get(reference)
                    .await
                    .map_err(|e| ApiError::from_storage(e, "payload", &context.id))?
            }
        };
        let actual = compute_checksum(&payload);
        if actual != context.checksum {
            return Err(ApiError::ChecksumMismatch {
                expected: context.checksum.clone(),
                actual,
            });
        }
        Ok(payload)
    }

    async fn remove_blob(&self, context_id: &str, reference: &PayloadRef) {
        if let Some(blobs) = &self.blobs {
            if let Err(e) = blobs.delete(reference).await {
                warn!(context_id = %context_id, key = %reference.key, error = %e, "Failed to remove payload blob");
            }
        }
    }

    async fn announce(&self, event: ContextEvent, context: &Context) {
        if let Some(announcer) = &self.announcer {
            announcer.announce(event, context).await;
        }
    }

    /// Default TTL applied when a request leaves it at zero.
    pub fn default_ttl(&self) -> Duration {
        self.ttl.context_ttl()
    }
}
