//! Service layer
//!
//! The seams between the pipeline steps and the managed services they call.
//! All services are trait-based so the executor can be exercised end to end
//! with in-memory implementations.

mod chat;
mod log_buffer;
mod storage;
mod warehouse;

// Re-export traits
pub use chat::ChatSink;
pub use log_buffer::LogBufferService;
pub use storage::ObjectStore;
pub use warehouse::Warehouse;

// Re-export implementations
pub use chat::SlackChat;
pub use log_buffer::InMemoryLogBuffer;
pub use storage::S3ObjectStore;
pub use warehouse::SnowflakeWarehouse;
