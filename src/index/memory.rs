//! In-process index used for dry runs and tests.
//!
//! All state lives behind one mutex, so an alias update and a read through that alias never
//! interleave.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde_json::Value;

use super::client::{
    AliasAction, BulkDocument, BulkOutcome, IndexClient, IndexSettings, ScriptedUpdate,
    UpdateScript, matches_pattern,
};
use crate::error::{IndexerError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    indices: BTreeMap<String, StoredIndex>,
    /// alias -> physical indices
    aliases: BTreeMap<String, BTreeSet<String>>,
    repositories: BTreeMap<String, String>,
    snapshots: Vec<(String, String, Vec<String>)>,
    faults: Vec<Fault>,
}

#[derive(Debug, Default)]
struct StoredIndex {
    settings: Option<IndexSettings>,
    docs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
struct Fault {
    prefix: String,
    fatal: bool,
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    state: Mutex<MemoryState>,
}

impl MemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every bulk call against indices starting with `prefix` fail. Fatal faults report the
    /// engine as unreachable; the others reject the batch.
    pub fn fail_bulk_for(&self, prefix: &str, fatal: bool) {
        self.lock().faults.push(Fault {
            prefix: prefix.to_string(),
            fatal,
        });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Every document visible through `name`, read under a single lock.
    #[must_use]
    pub fn documents(&self, name: &str) -> Vec<Value> {
        let state = self.lock();
        resolve(&state, name)
            .into_iter()
            .filter_map(|index| state.indices.get(&index))
            .flat_map(|stored| stored.docs.values().cloned())
            .collect()
    }

    #[must_use]
    pub fn document_count(&self, name: &str) -> usize {
        let state = self.lock();
        resolve(&state, name)
            .iter()
            .filter_map(|index| state.indices.get(index))
            .map(|stored| stored.docs.len())
            .sum()
    }

    /// Physical indices an alias currently points at.
    #[must_use]
    pub fn alias_targets(&self, alias: &str) -> Vec<String> {
        self.lock()
            .aliases
            .get(alias)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn indices(&self) -> Vec<String> {
        self.lock().indices.keys().cloned().collect()
    }

    #[must_use]
    pub fn settings(&self, index: &str) -> Option<IndexSettings> {
        self.lock().indices.get(index).and_then(|stored| stored.settings)
    }

    /// `(repository, snapshot, indices)` for every snapshot taken.
    #[must_use]
    pub fn snapshots(&self) -> Vec<(String, String, Vec<String>)> {
        self.lock().snapshots.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the state from the rest of the test.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn resolve(state: &MemoryState, name: &str) -> Vec<String> {
    if state.indices.contains_key(name) {
        return vec![name.to_string()];
    }
    state
        .aliases
        .get(name)
        .map(|targets| targets.iter().cloned().collect())
        .unwrap_or_default()
}

fn check_faults(state: &MemoryState, index: &str) -> Result<()> {
    match state.faults.iter().find(|fault| index.starts_with(&fault.prefix)) {
        Some(fault) if fault.fatal => Err(IndexerError::Unreachable {
            reason: format!("injected fault for {index}"),
        }),
        Some(_) => Err(IndexerError::Bulk {
            index: index.to_string(),
            reason: "injected rejection".to_string(),
        }),
        None => Ok(()),
    }
}

fn missing_index(index: &str) -> IndexerError {
    IndexerError::Bulk {
        index: index.to_string(),
        reason: "no such index".to_string(),
    }
}

impl IndexClient for MemoryIndex {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_index(&self, name: &str, settings: &IndexSettings) -> Result<()> {
        let mut state = self.lock();
        if state.indices.contains_key(name) || state.aliases.contains_key(name) {
            return Err(IndexerError::Lifecycle(format!(
                "index {name} already exists"
            )));
        }
        state.indices.insert(
            name.to_string(),
            StoredIndex {
                settings: Some(*settings),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn bulk_write(&self, index: &str, docs: &[BulkDocument]) -> Result<BulkOutcome> {
        let mut state = self.lock();
        check_faults(&state, index)?;
        let stored = state
            .indices
            .get_mut(index)
            .ok_or_else(|| missing_index(index))?;
        for doc in docs {
            stored.docs.insert(doc.id.clone(), doc.body.clone());
        }
        Ok(BulkOutcome {
            succeeded: docs.len(),
            ..BulkOutcome::default()
        })
    }

    fn bulk_update(
        &self,
        index: &str,
        script: UpdateScript,
        updates: &[ScriptedUpdate],
    ) -> Result<BulkOutcome> {
        let mut state = self.lock();
        check_faults(&state, index)?;
        let stored = state
            .indices
            .get_mut(index)
            .ok_or_else(|| missing_index(index))?;
        let mut outcome = BulkOutcome::default();
        for update in updates {
            match stored.docs.get_mut(&update.id) {
                Some(doc) => {
                    script.apply(doc, &update.params);
                    outcome.succeeded += 1;
                }
                None => outcome.record_failure(format!("document {} not found", update.id)),
            }
        }
        Ok(outcome)
    }

    fn refresh(&self, _index: &str) -> Result<()> {
        Ok(())
    }

    fn list_aliases(&self, pattern: &str) -> Result<Vec<(String, String)>> {
        let state = self.lock();
        Ok(state
            .aliases
            .iter()
            .filter(|(alias, _)| matches_pattern(pattern, alias))
            .flat_map(|(alias, targets)| {
                targets
                    .iter()
                    .map(move |index| (index.clone(), alias.clone()))
            })
            .collect())
    }

    fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut state = self.lock();
        let missing = actions.iter().find_map(|action| match action {
            AliasAction::Add { index, .. } if !state.indices.contains_key(index) => Some(index),
            _ => None,
        });
        if let Some(index) = missing {
            return Err(IndexerError::Lifecycle(format!(
                "cannot alias missing index {index}"
            )));
        }
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    state
                        .aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(targets) = state.aliases.get_mut(alias) {
                        targets.remove(index);
                        if targets.is_empty() {
                            state.aliases.remove(alias);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn list_indices(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .indices
            .keys()
            .filter(|name| matches_pattern(pattern, name))
            .cloned()
            .collect())
    }

    fn delete_index(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.indices.remove(name);
        state.aliases.retain(|_, targets| {
            targets.remove(name);
            !targets.is_empty()
        });
        Ok(())
    }

    fn create_snapshot_repository(&self, repository: &str, bucket: &str) -> Result<()> {
        self.lock()
            .repositories
            .insert(repository.to_string(), bucket.to_string());
        Ok(())
    }

    fn create_snapshot(&self, repository: &str, snapshot: &str, indices: &[String]) -> Result<()> {
        let mut state = self.lock();
        if !state.repositories.contains_key(repository) {
            return Err(IndexerError::Lifecycle(format!(
                "snapshot repository {repository} is not registered"
            )));
        }
        state.snapshots.push((
            repository.to_string(),
            snapshot.to_string(),
            indices.to_vec(),
        ));
        Ok(())
    }

    fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let state = self.lock();
        Ok(resolve(&state, index)
            .iter()
            .filter_map(|name| state.indices.get(name))
            .find_map(|stored| stored.docs.get(id).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, generation: u32) -> BulkDocument {
        BulkDocument {
            id: id.to_string(),
            body: json!({ "key": id, "generation": generation }),
        }
    }

    #[test]
    fn writes_are_readable_through_alias() {
        let index = MemoryIndex::new();
        index
            .create_index("pas_1", &IndexSettings::default())
            .expect("create");
        index.bulk_write("pas_1", &[doc("1-1", 1)]).expect("write");
        index
            .update_aliases(&[AliasAction::Add {
                index: "pas_1".into(),
                alias: "pas".into(),
            }])
            .expect("alias");
        let found = index.get_document("pas", "1-1").expect("get").expect("doc");
        assert_eq!(found["generation"], 1);
        assert_eq!(
            index.list_aliases("pas*").expect("aliases"),
            vec![("pas_1".to_string(), "pas".to_string())]
        );
    }

    #[test]
    fn write_to_missing_index_is_rejected() {
        let index = MemoryIndex::new();
        let err = index.bulk_write("nope", &[doc("1", 1)]).expect_err("missing");
        assert!(!err.is_fatal());
    }

    #[test]
    fn alias_update_with_missing_target_changes_nothing() {
        let index = MemoryIndex::new();
        index
            .create_index("pas_1", &IndexSettings::default())
            .expect("create");
        index
            .update_aliases(&[AliasAction::Add {
                index: "pas_1".into(),
                alias: "pas".into(),
            }])
            .expect("alias");
        let err = index.update_aliases(&[
            AliasAction::Remove {
                index: "pas_1".into(),
                alias: "pas".into(),
            },
            AliasAction::Add {
                index: "pas_2".into(),
                alias: "pas".into(),
            },
        ]);
        assert!(err.is_err());
        assert_eq!(index.alias_targets("pas"), vec!["pas_1".to_string()]);
    }

    #[test]
    fn deleting_an_index_drops_its_aliases() {
        let index = MemoryIndex::new();
        index
            .create_index("pas_1", &IndexSettings::default())
            .expect("create");
        index
            .update_aliases(&[AliasAction::Add {
                index: "pas_1".into(),
                alias: "pas".into(),
            }])
            .expect("alias");
        index.delete_index("pas_1").expect("delete");
        assert!(index.alias_targets("pas").is_empty());
        assert!(index.list_indices("pas*").expect("list").is_empty());
    }

    #[test]
    fn faults_apply_by_prefix() {
        let index = MemoryIndex::new();
        index
            .create_index("pas_1", &IndexSettings::default())
            .expect("create");
        index.fail_bulk_for("pas", true);
        let err = index.bulk_write("pas_1", &[doc("1", 1)]).expect_err("fault");
        assert!(err.is_fatal());
        index.clear_faults();
        index.bulk_write("pas_1", &[doc("1", 1)]).expect("write");
    }
}
