mod chunk_transfer;
mod context_lifecycle;
mod routing;
mod sled_backend;
mod support;
