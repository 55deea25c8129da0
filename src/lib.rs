// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod config;
pub mod duration;
pub mod error;
pub mod imaging;
pub mod metadata;
pub mod pipeline;
pub mod record;
pub mod signature;
pub mod social;
pub mod store;
pub mod subscription;
pub mod video;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::AppConfig;
pub use crate::error::{IngestError, IngestResult};
pub use crate::pipeline::{BatchOutcome, IngestPipeline, LiveRecordSource, RecordSource};
pub use crate::record::{CanonicalRecord, RecordPatch, SubscriptionRecord, Tag};
pub use crate::subscription::{HubClient, HubTransport, SubscriptionManager};
