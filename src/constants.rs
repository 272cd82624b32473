//! Shared constants: file layout, index aliases, batching and timeout defaults.

use std::time::Duration;

/// Alias of the person-appearance index.
pub const PAS_ALIAS: &str = "pas";
/// Alias of the lifecourse index.
pub const LIFECOURSES_ALIAS: &str = "lifecourses";
/// Alias of the source metadata index.
pub const SOURCES_ALIAS: &str = "sources";

/// Alias of the raw transcription index, published by its own run.
pub const TRANSCRIBED_ALIAS: &str = "transcribed";

/// Every alias a lifecourse run publishes, in creation order.
pub const ALIASES: [&str; 3] = [PAS_ALIAS, LIFECOURSES_ALIAS, SOURCES_ALIAS];

// Dataset layout relative to the dataset root.
pub const LIFECOURSES_FILE: &str = "life-courses/life_courses.csv";
pub const LINKS_FILE: &str = "links/links.csv";
pub const SOURCES_FILE: &str = "auxilary_data/sources/sources.csv";

pub const DEFAULT_BATCH_SIZE: usize = 3_000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Per-request timeout on the HTTP client.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for a bulk write of documents.
pub const BULK_WRITE_TIMEOUT: Duration = Duration::from_secs(7 * 60);
/// Timeout for a bulk scripted update.
pub const BULK_UPDATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// `index.max_result_window` applied to every created index.
pub const MAX_RESULT_WINDOW: u32 = 1_000;

/// Format of the timestamp suffix of physical index names.
pub const INDEX_TIMESTAMP_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";

pub const DEFAULT_SNAPSHOT_REPOSITORY: &str = "s3_repository";
