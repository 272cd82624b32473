//! Public data types exposed by the `lifecourse-indexer` crate.

pub mod appearance;
pub mod lifecourse;
pub mod link;
pub mod record;
pub mod source;

pub use appearance::{BasePa, StandardPa, TranscribedPa};
pub use lifecourse::{LifeCourse, LifeCourseRow, lifecourse_key};
pub use link::{Link, canonical_link_key, split_ids};
pub use record::Record;
pub use source::{Source, SourceFamily, pa_key};
