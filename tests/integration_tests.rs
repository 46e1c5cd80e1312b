//! End-to-end scenarios over the in-memory adapters and the sled store.

mod integration;
