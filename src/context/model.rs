//! Context entity
//!
//! A typed, versioned, access-scoped, time-limited payload shared between agents.

use crate::types::{AgentID, Checksum, ContextID, TenantID};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// Who may read a context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Every agent in the tenant
    Public,
    /// Only the creating agent
    #[default]
    Private,
    /// A named group of agents
    Group,
    /// Agents the creator explicitly shared with
    Shared,
}

impl Scope {
    /// Scopes whose readers are enumerated in `allowed_ids`.
    pub fn requires_allow_list(self) -> bool {
        matches!(self, Scope::Group | Scope::Shared)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Public => "public",
            Scope::Private => "private",
            Scope::Group => "group",
            Scope::Shared => "shared",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Scope::Public),
            "private" => Ok(Scope::Private),
            "group" => Ok(Scope::Group),
            "shared" => Ok(Scope::Shared),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}

/// Access policy of a context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    pub scope: Scope,
    /// Readers for group/shared scopes; ignored for public/private
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allowed_ids: BTreeSet<AgentID>,
}

impl AccessControl {
    pub fn public() -> Self {
        Self {
            scope: Scope::Public,
            allowed_ids: BTreeSet::new(),
        }
    }

    pub fn private() -> Self {
        Self {
            scope: Scope::Private,
            allowed_ids: BTreeSet::new(),
        }
    }

    pub fn group<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope: Scope::Group,
            allowed_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shared<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope: Scope::Shared,
            allowed_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, agent_id: &str) -> bool {
        self.allowed_ids.contains(agent_id)
    }
}

/// Pointer to payload bytes held outside the context record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    /// Storage backend name, e.g. "sled" or "memory"
    pub backend: String,
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

/// Shared state between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: ContextID,
    #[serde(rename = "type")]
    pub context_type: String,
    pub agent_id: AgentID,
    pub tenant_id: TenantID,
    /// Inline bytes; empty when the payload lives behind `payload_ref`
    #[serde(default, with = "hex", skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<PayloadRef>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    /// Lifetime in seconds, as applied at creation or last TTL reset
    pub ttl_secs: u64,
    pub access_control: AccessControl,
    pub created_at: DateTime<Utc>,
    /// None never expires
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Hex SHA-256 of the payload (of the referenced bytes for `payload_ref`)
    pub checksum: Checksum,
}

impl Context {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Logical expiration, independent of whether the row has been swept.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }

    /// Size of the payload whether inline or referenced.
    pub fn payload_size(&self) -> u64 {
        match &self.payload_ref {
            Some(reference) => reference.size,
            None => self.payload.len() as u64,
        }
    }

    /// Replace the inline payload and keep the checksum in step.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.checksum = compute_checksum(&payload);
        self.payload = payload;
        self.payload_ref = None;
    }
}

/// Hex SHA-256 of `data`.
pub fn compute_checksum(data: &[u8]) -> Checksum {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// `now + ttl`, saturating to "never" if the addition overflows.
pub fn expiration_from(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Context {
        let now = Utc::now();
        Context {
            id: "c1".to_string(),
            context_type: "doc".to_string(),
            agent_id: "agent-a".to_string(),
            tenant_id: "t1".to_string(),
            payload: b"hello".to_vec(),
            payload_ref: None,
            metadata: HashMap::new(),
            version: "1".to_string(),
            schema_id: None,
            ttl_secs: 60,
            access_control: AccessControl::public(),
            created_at: now,
            expires_at: expiration_from(now, Duration::from_secs(60)),
            checksum: compute_checksum(b"hello"),
        }
    }

    #[test]
    fn test_checksum_known_vector() {
        assert_eq!(
            compute_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            compute_checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_is_expired_boundary() {
        let ctx = sample();
        let expires_at = ctx.expires_at.unwrap();
        assert!(!ctx.is_expired_at(ctx.created_at));
        assert!(!ctx.is_expired_at(expires_at));
        assert!(ctx.is_expired_at(expires_at + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_no_expiry_never_expires() {
        let mut ctx = sample();
        ctx.expires_at = None;
        assert!(!ctx.is_expired_at(Utc::now() + chrono::Duration::days(3650)));
    }

    #[test]
    fn test_set_payload_recomputes_checksum() {
        let mut ctx = sample();
        ctx.set_payload(b"world".to_vec());
        assert_eq!(ctx.checksum, compute_checksum(b"world"));
    }

    #[test]
    fn test_json_shape() {
        let ctx = sample();
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["type"], "doc");
        assert_eq!(value["payload"], hex::encode(b"hello"));
        assert_eq!(value["access_control"]["scope"], "public");
        assert!(value.get("payload_ref").is_none());

        let back: Context = serde_json::from_value(value).unwrap();
        assert_eq!(back, ctx);
    }

    proptest! {
        #[test]
        fn prop_checksum_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            prop_assert_eq!(compute_checksum(&data), compute_checksum(&data.clone()));
        }

        #[test]
        fn prop_distinct_payloads_have_distinct_checksums(
            a in proptest::collection::vec(any::<u8>(), 0..512),
            b in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            prop_assert_eq!(compute_checksum(&a) == compute_checksum(&b), a == b);
        }
    }
}
