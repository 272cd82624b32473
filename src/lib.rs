#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::useless_vec,
        clippy::uninlined_format_args,
        clippy::float_cmp
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: internal helpers are self-describing; public entry points carry docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Casts are bounded by row counts and calendar years.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_precision_loss)]
//
// Stage functions read top to bottom.
#![allow(clippy::too_many_lines)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::similar_names)] // pa_id, pa_key, pa_keys
//
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)] // RunConfig flags
#![allow(clippy::implicit_hasher)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unused_self)]
#![allow(clippy::format_push_string)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::default_trait_access)]

//! Lifecourse indexing.
//!
//! Reads a linked genealogical dataset (lifecourses, links, per-source person appearances),
//! assembles deduplicated lifecourse aggregates and publishes them with their appearances into
//! alias-addressed search indices. Each run builds a fresh generation of indices and only moves
//! the aliases once the whole run has succeeded.

/// The crate version (matches `Cargo.toml`).
pub const INDEXER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod assemble;
pub mod config;
pub mod constants;
pub mod error;
pub mod index;
pub mod links;
pub mod merge;
pub mod pipeline;
pub mod publish;
pub mod reader;
pub mod reverse;
pub mod store;
pub mod telemetry;
pub mod transcribed;
pub mod types;

pub use assemble::{Assembly, AssemblyStats, LifecourseAssembler};
pub use config::{RunConfig, RunConfigBuilder, SnapshotConfig};
pub use error::{IndexerError, Result};
pub use index::{
    ElasticClient, GenerationState, IndexClient, IndexDocument, IndexLifecycle, MemoryIndex,
    UpdateScript,
};
pub use links::{CanonicalLinks, DedupStats, dedup_links};
pub use merge::{AppearanceMerger, MergeStats};
pub use pipeline::{Indexer, RunReport, SourceReport};
pub use publish::{BatchPublisher, PublishStats};
pub use reader::CsvDataset;
pub use reverse::ReverseIndex;
pub use store::{RelationalStore, SqliteStore};
pub use transcribed::{TranscribedIndexer, TranscribedReport};
pub use types::{BasePa, LifeCourse, LifeCourseRow, Link, Record, Source, SourceFamily, StandardPa, TranscribedPa};
