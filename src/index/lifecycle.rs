//! Blue-green lifecycle of the physical indices behind each alias.
//!
//! Every run builds a fresh generation per alias: `Created` when the physical index exists,
//! `Populated` once the pipeline has written to it, `Active` after the alias has been moved onto
//! it. Generations that never reach `Active` are deleted by [`IndexLifecycle::rollback`], which
//! leaves whatever the aliases pointed at before the run untouched.

use chrono::Local;

use super::client::{AliasAction, IndexClient, IndexSettings};
use crate::constants::INDEX_TIMESTAMP_FORMAT;
use crate::error::{IndexerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    NoIndex,
    Created,
    Populated,
    Active,
    /// Was active, then replaced by a newer generation.
    Superseded,
    Deleted,
    RolledBack,
}

impl GenerationState {
    /// Whether rollback removes a generation in this state.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Created | Self::Populated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub alias: String,
    pub physical: String,
    pub state: GenerationState,
}

/// What an activation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub alias: String,
    pub physical: String,
    /// Physical indices the alias was moved away from.
    pub unbound: Vec<String>,
    /// Older physical indices of the alias that were deleted.
    pub deleted: Vec<String>,
}

pub struct IndexLifecycle<'c, C: IndexClient + ?Sized> {
    client: &'c C,
    settings: IndexSettings,
    generations: Vec<Generation>,
}

/// Whether `name` is one of `alias`'s physical indices (or the alias itself).
fn belongs_to(alias: &str, name: &str) -> bool {
    name == alias
        || name
            .strip_prefix(alias)
            .is_some_and(|rest| rest.starts_with('_'))
}

fn timestamp() -> String {
    Local::now().format(INDEX_TIMESTAMP_FORMAT).to_string()
}

impl<'c, C: IndexClient + ?Sized> IndexLifecycle<'c, C> {
    pub fn new(client: &'c C) -> Self {
        Self {
            client,
            settings: IndexSettings::default(),
            generations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: IndexSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    /// Physical index of this run's generation for `alias`.
    #[must_use]
    pub fn physical(&self, alias: &str) -> Option<&str> {
        self.generation(alias).map(|g| g.physical.as_str())
    }

    #[must_use]
    pub fn state(&self, alias: &str) -> GenerationState {
        self.generation(alias)
            .map_or(GenerationState::NoIndex, |g| g.state)
    }

    fn generation(&self, alias: &str) -> Option<&Generation> {
        self.generations
            .iter()
            .rev()
            .find(|g| g.alias == alias && g.state != GenerationState::RolledBack)
    }

    fn generation_mut(&mut self, alias: &str) -> Result<&mut Generation> {
        self.generations
            .iter_mut()
            .rev()
            .find(|g| g.alias == alias && g.state != GenerationState::RolledBack)
            .ok_or_else(|| IndexerError::Lifecycle(format!("no generation for alias {alias}")))
    }

    /// `{alias}_{timestamp}`, with a numeric suffix when that name is already taken.
    fn unique_name(&self, alias: &str) -> Result<String> {
        let base = format!("{alias}_{}", timestamp());
        let taken = self.client.list_indices(&format!("{base}*"))?;
        if !taken.contains(&base) {
            return Ok(base);
        }
        let mut n = 1usize;
        loop {
            let candidate = format!("{base}-{n}");
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Create a new physical index for `alias`.
    pub fn create(&mut self, alias: &str) -> Result<String> {
        if self.generation(alias).is_some() {
            return Err(IndexerError::Lifecycle(format!(
                "alias {alias} already has a generation in this run"
            )));
        }
        let physical = self.unique_name(alias)?;
        self.client.create_index(&physical, &self.settings)?;
        tracing::info!(
            target = "lifecourse::lifecycle",
            alias,
            index = %physical,
            backend = self.client.name(),
            "created index"
        );
        self.generations.push(Generation {
            alias: alias.to_string(),
            physical: physical.clone(),
            state: GenerationState::Created,
        });
        Ok(physical)
    }

    pub fn mark_populated(&mut self, alias: &str) -> Result<()> {
        let generation = self.generation_mut(alias)?;
        match generation.state {
            GenerationState::Created | GenerationState::Populated => {
                generation.state = GenerationState::Populated;
                Ok(())
            }
            other => Err(IndexerError::Lifecycle(format!(
                "cannot mark {} populated from {other:?}",
                generation.physical
            ))),
        }
    }

    /// Move `alias` onto this run's generation in one alias update, then delete the alias's
    /// older physical indices.
    pub fn activate(&mut self, alias: &str) -> Result<ActivationReport> {
        let client = self.client;
        let generation = self.generation_mut(alias)?;
        if generation.state != GenerationState::Populated {
            return Err(IndexerError::Lifecycle(format!(
                "cannot activate {} from {:?}",
                generation.physical, generation.state
            )));
        }
        let physical = generation.physical.clone();
        let pattern = format!("{alias}*");

        let bindings: Vec<(String, String)> = client
            .list_aliases(&pattern)?
            .into_iter()
            .filter(|(_, bound)| belongs_to(alias, bound))
            .collect();
        let mut actions: Vec<AliasAction> = bindings
            .iter()
            .map(|(index, bound)| AliasAction::Remove {
                index: index.clone(),
                alias: bound.clone(),
            })
            .collect();
        actions.push(AliasAction::Add {
            index: physical.clone(),
            alias: alias.to_string(),
        });
        client.update_aliases(&actions)?;
        generation.state = GenerationState::Active;

        let mut report = ActivationReport {
            alias: alias.to_string(),
            physical: physical.clone(),
            unbound: bindings
                .into_iter()
                .map(|(index, _)| index)
                .filter(|index| *index != physical)
                .collect(),
            deleted: Vec::new(),
        };
        report.unbound.dedup();

        for old in client.list_indices(&pattern)? {
            if old == physical || !belongs_to(alias, &old) {
                continue;
            }
            match client.delete_index(&old) {
                Ok(()) => report.deleted.push(old),
                Err(err) => tracing::warn!(
                    target = "lifecourse::lifecycle",
                    index = %old,
                    error = %err,
                    "failed to delete superseded index"
                ),
            }
        }
        tracing::info!(
            target = "lifecourse::lifecycle",
            alias,
            index = %physical,
            unbound = report.unbound.len(),
            deleted = report.deleted.len(),
            "activated index"
        );
        Ok(report)
    }

    /// Activate every populated generation, in creation order.
    pub fn activate_all(&mut self) -> Result<Vec<ActivationReport>> {
        let aliases: Vec<String> = self
            .generations
            .iter()
            .filter(|g| g.state == GenerationState::Populated)
            .map(|g| g.alias.clone())
            .collect();
        aliases.iter().map(|alias| self.activate(alias)).collect()
    }

    /// Delete every generation of this run that was not activated. Deletion failures are logged
    /// and do not stop the remaining deletions. Returns the indices deleted.
    pub fn rollback(&mut self) -> Vec<String> {
        let client = self.client;
        let mut deleted = Vec::new();
        for generation in &mut self.generations {
            if !generation.state.is_pending() {
                continue;
            }
            match client.delete_index(&generation.physical) {
                Ok(()) => {
                    tracing::info!(
                        target = "lifecourse::lifecycle",
                        index = %generation.physical,
                        "rolled back index"
                    );
                    deleted.push(generation.physical.clone());
                }
                Err(err) => tracing::warn!(
                    target = "lifecourse::lifecycle",
                    index = %generation.physical,
                    error = %err,
                    "failed to delete index during rollback"
                ),
            }
            generation.state = GenerationState::RolledBack;
        }
        deleted
    }

    /// Register `repository` on `bucket` and snapshot the active generations. Returns the
    /// snapshot name.
    pub fn snapshot(&self, repository: &str, bucket: &str) -> Result<String> {
        let indices: Vec<String> = self
            .generations
            .iter()
            .filter(|g| g.state == GenerationState::Active)
            .map(|g| g.physical.clone())
            .collect();
        if indices.is_empty() {
            return Err(IndexerError::Lifecycle(
                "no active indices to snapshot".to_string(),
            ));
        }
        self.client.create_snapshot_repository(repository, bucket)?;
        let name = format!("snapshot_{}", timestamp());
        self.client.create_snapshot(repository, &name, &indices)?;
        tracing::info!(
            target = "lifecourse::lifecycle",
            repository,
            snapshot = %name,
            indices = indices.len(),
            "requested snapshot"
        );
        Ok(name)
    }
}
