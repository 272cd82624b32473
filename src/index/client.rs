//! The bulk-capable search index surface the pipeline publishes through.

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::Result;
use crate::types::{BasePa, LifeCourse, Source, TranscribedPa};

/// Settings applied when a physical index is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    pub date_detection: bool,
    pub max_result_window: u32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            date_detection: false,
            max_result_window: crate::constants::MAX_RESULT_WINDOW,
        }
    }
}

/// A document ready for a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    pub id: String,
    pub body: Value,
}

impl BulkDocument {
    pub fn from_document<D: IndexDocument + ?Sized>(doc: &D) -> Result<Self> {
        Ok(Self {
            id: doc.document_id(),
            body: serde_json::to_value(doc)?,
        })
    }
}

/// One scripted partial update addressed by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedUpdate {
    pub id: String,
    pub params: Value,
}

/// Per-item result of a bulk call that reached the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub first_error: Option<String>,
}

impl BulkOutcome {
    pub(crate) fn record_failure(&mut self, reason: impl Into<String>) {
        self.failed += 1;
        if self.first_error.is_none() {
            self.first_error = Some(reason.into());
        }
    }
}

/// Alias changes applied together in one atomic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

/// Scripts the pipeline runs against lifecourse documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateScript {
    /// Append `params.pa` to `person_appearance` unless an appearance with the same key is
    /// already there, and refresh the sortable summary when `params.pa` has a strictly earlier
    /// event year than the one stored (or none is stored).
    AppendAppearance,
}

const APPEND_APPEARANCE_PAINLESS: &str = r"
if (ctx._source.person_appearance == null) { ctx._source.person_appearance = []; }
boolean seen = false;
for (def existing : ctx._source.person_appearance) {
  if (existing.key == params.pa.key) { seen = true; break; }
}
if (!seen) { ctx._source.person_appearance.add(params.pa); }
def year = params.pa.event_year_sortable;
def current = ctx._source.event_year_sortable;
boolean earlier = year != null && (current == null || year < current);
if (earlier) {
  ctx._source.first_name_sortable = params.pa.first_name_sortable;
  ctx._source.last_name_sortable = params.pa.last_name_sortable;
  ctx._source.birth_year_sortable = params.pa.birth_year_sortable;
  ctx._source.death_year_sortable = params.pa.death_year_sortable;
  ctx._source.event_year_sortable = year;
  ctx._source.source_year_searchable = params.pa.source_year_searchable;
}
if (seen && !earlier) { ctx.op = 'noop'; }
";

const SUMMARY_FIELDS: [&str; 5] = [
    "first_name_sortable",
    "last_name_sortable",
    "birth_year_sortable",
    "death_year_sortable",
    "source_year_searchable",
];

impl UpdateScript {
    /// Painless source sent to the engine.
    #[must_use]
    pub fn painless(self) -> &'static str {
        match self {
            Self::AppendAppearance => APPEND_APPEARANCE_PAINLESS,
        }
    }

    /// Parameters for applying the script with `pa`.
    pub fn params<P: Serialize>(self, pa: &P) -> Result<Value> {
        Ok(json!({ "pa": serde_json::to_value(pa)? }))
    }

    /// Apply the script to a document held in memory. Returns whether the document changed.
    pub fn apply(self, doc: &mut Value, params: &Value) -> bool {
        match self {
            Self::AppendAppearance => apply_append_appearance(doc, params),
        }
    }
}

fn apply_append_appearance(doc: &mut Value, params: &Value) -> bool {
    let Some(source) = doc.as_object_mut() else {
        return false;
    };
    let pa = &params["pa"];
    let pa_key = pa.get("key");

    let appearances = source
        .entry("person_appearance")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !appearances.is_array() {
        *appearances = Value::Array(Vec::new());
    }
    let mut changed = false;
    if let Value::Array(list) = appearances {
        let seen = list.iter().any(|existing| existing.get("key") == pa_key);
        if !seen {
            list.push(pa.clone());
            changed = true;
        }
    }

    let year = pa.get("event_year_sortable").and_then(Value::as_i64);
    let current = source.get("event_year_sortable").and_then(Value::as_i64);
    let earlier = match (year, current) {
        (Some(year), Some(current)) => year < current,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if earlier {
        for field in SUMMARY_FIELDS {
            source.insert(field.to_string(), pa.get(field).cloned().unwrap_or(Value::Null));
        }
        source.insert("event_year_sortable".to_string(), Value::from(year));
        changed = true;
    }
    changed
}

/// A value published as a document with a stable id.
pub trait IndexDocument: Serialize {
    fn document_id(&self) -> String;
}

impl<T: IndexDocument + ?Sized> IndexDocument for &T {
    fn document_id(&self) -> String {
        (**self).document_id()
    }
}

impl IndexDocument for BasePa {
    fn document_id(&self) -> String {
        self.key.clone()
    }
}

impl IndexDocument for LifeCourse {
    fn document_id(&self) -> String {
        self.key.clone()
    }
}

impl IndexDocument for TranscribedPa {
    fn document_id(&self) -> String {
        self.key.clone()
    }
}

impl IndexDocument for Source {
    fn document_id(&self) -> String {
        self.source_id.to_string()
    }
}

/// Operations the pipeline needs from a search engine. Implementations are shared across the
/// per-source workers, so they must be safe for concurrent use.
pub trait IndexClient: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn create_index(&self, name: &str, settings: &IndexSettings) -> Result<()>;

    fn bulk_write(&self, index: &str, docs: &[BulkDocument]) -> Result<BulkOutcome>;

    fn bulk_update(
        &self,
        index: &str,
        script: UpdateScript,
        updates: &[ScriptedUpdate],
    ) -> Result<BulkOutcome>;

    /// Make recent writes visible to readers.
    fn refresh(&self, index: &str) -> Result<()>;

    /// `(index, alias)` bindings whose alias matches `pattern`.
    fn list_aliases(&self, pattern: &str) -> Result<Vec<(String, String)>>;

    /// Apply every action at once: readers observe either none or all of them.
    fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;

    /// Physical indices whose name matches `pattern`.
    fn list_indices(&self, pattern: &str) -> Result<Vec<String>>;

    fn delete_index(&self, name: &str) -> Result<()>;

    fn create_snapshot_repository(&self, repository: &str, bucket: &str) -> Result<()>;

    fn create_snapshot(&self, repository: &str, snapshot: &str, indices: &[String]) -> Result<()>;

    /// Fetch one document by id through an index or alias name.
    fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>>;
}

/// Match `name` against a pattern with at most a trailing `*`.
#[must_use]
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(key: &str, year: Option<i64>, first: &str) -> Value {
        json!({
            "key": key,
            "event_year_sortable": year,
            "first_name_sortable": first,
            "last_name_sortable": "hansen",
            "birth_year_sortable": year.map(|y| y - 30),
            "death_year_sortable": null,
            "source_year_searchable": year,
        })
    }

    fn baseline() -> Value {
        json!({ "key": "lc", "person_appearance": [], "event_year_sortable": null })
    }

    #[test]
    fn append_refreshes_summary_only_for_earlier_year() {
        let script = UpdateScript::AppendAppearance;
        let mut doc = baseline();
        assert!(script.apply(&mut doc, &json!({ "pa": pa("1-1", Some(1850), "jens") })));
        assert_eq!(doc["event_year_sortable"], 1850);
        assert_eq!(doc["first_name_sortable"], "jens");

        script.apply(&mut doc, &json!({ "pa": pa("2-1", Some(1860), "peter") }));
        assert_eq!(doc["event_year_sortable"], 1850);
        assert_eq!(doc["first_name_sortable"], "jens");

        script.apply(&mut doc, &json!({ "pa": pa("3-1", Some(1801), "hans") }));
        assert_eq!(doc["event_year_sortable"], 1801);
        assert_eq!(doc["first_name_sortable"], "hans");
        assert_eq!(doc["person_appearance"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn missing_event_year_never_refreshes() {
        let script = UpdateScript::AppendAppearance;
        let mut doc = baseline();
        script.apply(&mut doc, &json!({ "pa": pa("1-1", None, "jens") }));
        assert!(doc["event_year_sortable"].is_null());
        assert!(doc.get("first_name_sortable").is_none());
    }

    #[test]
    fn reapplying_is_idempotent() {
        let script = UpdateScript::AppendAppearance;
        let params = json!({ "pa": pa("1-1", Some(1850), "jens") });
        let mut doc = baseline();
        assert!(script.apply(&mut doc, &params));
        let once = doc.clone();
        assert!(!script.apply(&mut doc, &params));
        assert_eq!(doc, once);
    }

    #[test]
    fn earliest_year_wins_in_any_order() {
        let script = UpdateScript::AppendAppearance;
        let years = [1834, 1845, 1801, 1880, 1787, 1860, 1901, 1850];
        let updates: Vec<Value> = years
            .iter()
            .enumerate()
            .map(|(i, y)| json!({ "pa": pa(&format!("{i}-1"), Some(*y), "x") }))
            .collect();
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..50 {
            let mut order = updates.clone();
            rng.shuffle(&mut order);
            let mut doc = baseline();
            for params in &order {
                script.apply(&mut doc, params);
            }
            assert_eq!(doc["event_year_sortable"], 1787);
            assert_eq!(doc["person_appearance"].as_array().map(Vec::len), Some(years.len()));
        }
    }

    #[test]
    fn painless_source_guards_duplicates_and_compares_strictly() {
        let source = UpdateScript::AppendAppearance.painless();
        assert!(source.contains("existing.key == params.pa.key"));
        assert!(source.contains("year < current"));
    }

    #[test]
    fn pattern_matching() {
        assert!(matches_pattern("pas*", "pas_01-01-2024_10-00-00"));
        assert!(matches_pattern("pas", "pas"));
        assert!(!matches_pattern("pas", "pas_1"));
        assert!(!matches_pattern("lifecourses*", "pas_1"));
    }
}
