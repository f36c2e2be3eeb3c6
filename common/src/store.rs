// Configuration store: the authoritative registry of trigger specs
//
// Writers are serialized by an async mutex held across validate → persist →
// publish → notify. Readers clone an `Arc` snapshot under a short read lock and
// never wait on persistence.

use crate::errors::{StoreError, ValidationError};
use crate::models::{JobIdentity, ScheduleSpec};
use crate::sink::SpecSink;
use crate::validation;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{watch, Mutex};
use tracing::{info, instrument, warn};

/// Immutable, ordered view of the registry
pub type SpecSnapshot = Arc<[ScheduleSpec]>;

pub struct ConfigurationStore {
    specs: RwLock<SpecSnapshot>,
    write_lock: Mutex<()>,
    sink: Arc<dyn SpecSink>,
    changes: watch::Sender<u64>,
}

impl ConfigurationStore {
    /// Load the registry from `sink`
    ///
    /// Unreadable sinks, empty names and duplicate names fail the load. Specs
    /// with field-level problems are kept and reported so a hand-edited file
    /// never silently loses entries.
    #[instrument(skip(sink))]
    pub async fn load(sink: Arc<dyn SpecSink>) -> Result<Self, StoreError> {
        let specs = sink.load().await?;

        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.name.trim().is_empty() {
                return Err(ValidationError::MissingField("name".to_string()).into());
            }
            if !seen.insert(spec.identity()) {
                return Err(ValidationError::DuplicateName(spec.name.clone()).into());
            }
            if let Err(e) = validation::validate_spec(spec) {
                warn!(trigger = %spec.name, error = %e, "Loaded trigger failed validation");
            }
        }

        info!(count = specs.len(), "Trigger registry loaded");
        Ok(Self::from_parts(specs, sink))
    }

    fn from_parts(specs: Vec<ScheduleSpec>, sink: Arc<dyn SpecSink>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            specs: RwLock::new(specs.into()),
            write_lock: Mutex::new(()),
            sink,
            changes,
        }
    }

    /// Read-consistent snapshot of all specs in registry order
    pub fn get_all(&self) -> SpecSnapshot {
        self.specs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up a spec by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<ScheduleSpec> {
        let identity = JobIdentity::from_name(name);
        self.get_all()
            .iter()
            .find(|spec| spec.identity() == identity)
            .cloned()
    }

    /// Subscribe to change notifications; the value is the registry revision
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Current registry revision, incremented on every successful mutation
    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Insert or replace a spec
    ///
    /// With `original_name` set the entry under that name is replaced (a
    /// rename when the names differ); otherwise the entry with the same name is
    /// replaced or the spec is appended.
    #[instrument(skip(self, spec), fields(trigger = %spec.name))]
    pub async fn upsert(
        &self,
        spec: ScheduleSpec,
        original_name: Option<&str>,
    ) -> Result<(), StoreError> {
        validation::validate_spec(&spec)?;

        let _guard = self.write_lock.lock().await;
        let mut next = self.get_all().to_vec();

        let new_identity = spec.identity();
        let target = original_name
            .map(JobIdentity::from_name)
            .unwrap_or_else(|| new_identity.clone());
        let position = next.iter().position(|s| s.identity() == target);

        if let (Some(original), None) = (original_name, position) {
            return Err(StoreError::NotFound(original.to_string()));
        }

        let collides = next
            .iter()
            .enumerate()
            .any(|(i, s)| Some(i) != position && s.identity() == new_identity);
        if collides {
            return Err(ValidationError::DuplicateName(spec.name).into());
        }

        let action = match position {
            Some(i) => {
                next[i] = spec;
                "updated"
            }
            None => {
                next.push(spec);
                "created"
            }
        };

        self.commit(next, action).await
    }

    /// Remove a spec by name, returning it
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<ScheduleSpec, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.get_all().to_vec();

        let identity = JobIdentity::from_name(name);
        let position = next
            .iter()
            .position(|s| s.identity() == identity)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let removed = next.remove(position);

        self.commit(next, "removed").await?;
        Ok(removed)
    }

    /// Enable or disable a spec without revalidating its other fields
    ///
    /// Returns the spec as committed by this call.
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<ScheduleSpec, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.get_all().to_vec();

        let identity = JobIdentity::from_name(name);
        let position = next
            .iter()
            .position(|s| s.identity() == identity)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if next[position].enabled == enabled {
            return Ok(next.swap_remove(position));
        }
        let updated = next[position].clone().with_enabled(enabled);
        next[position] = updated.clone();

        self.commit(next, if enabled { "enabled" } else { "disabled" })
            .await?;
        Ok(updated)
    }

    /// Reorder the registry; `names` must be a permutation of the current names
    #[instrument(skip(self, names), fields(count = names.len()))]
    pub async fn reorder(&self, names: &[String]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self.get_all();

        if names.len() != current.len() {
            return Err(ValidationError::InvalidOrder(format!(
                "expected {} names, got {}",
                current.len(),
                names.len()
            ))
            .into());
        }

        let mut seen = HashSet::new();
        let mut next = Vec::with_capacity(names.len());
        for name in names {
            let identity = JobIdentity::from_name(name);
            if !seen.insert(identity.clone()) {
                return Err(
                    ValidationError::InvalidOrder(format!("'{}' listed twice", name)).into(),
                );
            }
            let spec = current
                .iter()
                .find(|s| s.identity() == identity)
                .ok_or_else(|| StoreError::NotFound(name.clone()))?;
            next.push(spec.clone());
        }

        if next.iter().zip(current.iter()).all(|(a, b)| a.name == b.name) {
            return Ok(());
        }

        self.commit(next, "reordered").await
    }

    /// Replace the whole registry, validating every spec
    #[instrument(skip(self, specs), fields(count = specs.len()))]
    pub async fn replace_all(&self, specs: Vec<ScheduleSpec>) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            validation::validate_spec(spec)?;
            if !seen.insert(spec.identity()) {
                return Err(ValidationError::DuplicateName(spec.name.clone()).into());
            }
        }

        let _guard = self.write_lock.lock().await;
        self.commit(specs, "replaced").await
    }

    /// Persist, publish and notify; the caller holds the write lock
    async fn commit(&self, next: Vec<ScheduleSpec>, action: &str) -> Result<(), StoreError> {
        self.sink.save(&next).await?;

        let count = next.len();
        *self.specs.write().unwrap_or_else(PoisonError::into_inner) = next.into();
        self.changes.send_modify(|revision| *revision += 1);

        info!(
            action = action,
            count = count,
            revision = self.revision(),
            "Trigger registry changed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationStore")
            .field("count", &self.get_all().len())
            .field("revision", &self.revision())
            .finish()
    }
}
