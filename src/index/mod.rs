//! Search index access: the client trait, its Elasticsearch and in-memory implementations, and
//! the blue-green lifecycle built on top of them.

pub mod client;
pub mod elastic;
pub mod lifecycle;
pub mod memory;

pub use client::{
    AliasAction, BulkDocument, BulkOutcome, IndexClient, IndexDocument, IndexSettings,
    ScriptedUpdate, UpdateScript, matches_pattern,
};
pub use elastic::ElasticClient;
pub use lifecycle::{ActivationReport, Generation, GenerationState, IndexLifecycle};
pub use memory::MemoryIndex;
