//! Context lifecycle: model, validation, access rules and the manager that
//! ties them to the persistence contract.

pub mod access;
pub mod events;
pub mod manager;
pub mod model;
pub mod requests;
pub mod validation;

pub use access::{authorize_read, authorize_write, can_read, can_write, Requester};
pub use events::{ChangeAnnouncer, ContextEvent, CONTEXT_EVENTS_TOPIC, EVENT_METADATA_KEY};
pub use manager::{ContextManager, PAYLOAD_BUCKET};
pub use model::{compute_checksum, expiration_from, AccessControl, Context, PayloadRef, Scope};
pub use requests::{CreateRequest, UpdateRequest};
pub use validation::{validate_access_control, validate_context};
