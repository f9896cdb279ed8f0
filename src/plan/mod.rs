//! Precomputed placement plans
//!
//! A plan maps tensor identifiers to byte offsets inside a fixed arena, one
//! table per `(model, batch, budget)` triple. Plans are produced offline by
//! a planner; this module only loads, queries, and round-trips them. The
//! JSON byte form is what travels through the runtime cache interface.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan serialization failed: {0}")]
    Serialization(String),
    #[error("plan I/O failed: {0}")]
    Io(String),
}

pub type PlanResult<T> = Result<T, PlanError>;

/// Offset table for one `(model, batch, budget)` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub model: String,
    pub batch: usize,
    pub budget: usize,
    /// Tensor identifier -> byte offset from the packing edge
    pub offsets: BTreeMap<String, usize>,
}

impl PlanEntry {
    pub fn new(model: impl Into<String>, batch: usize, budget: usize) -> Self {
        PlanEntry {
            model: model.into(),
            batch,
            budget,
            offsets: BTreeMap::new(),
        }
    }

    pub fn with_offset(mut self, tensor: impl Into<String>, offset: usize) -> Self {
        self.offsets.insert(tensor.into(), offset);
        self
    }
}

/// A set of placement tables, queried by exact `(model, batch, budget)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementPlan {
    entries: Vec<PlanEntry>,
}

impl PlacementPlan {
    pub fn new() -> Self {
        PlacementPlan::default()
    }

    /// Add or replace the entry for the entry's own `(model, batch, budget)`.
    pub fn insert(&mut self, entry: PlanEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|candidate| {
            candidate.model == entry.model
                && candidate.batch == entry.batch
                && candidate.budget == entry.budget
        }) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn find(&self, model: &str, batch: usize, budget: usize) -> Option<&PlanEntry> {
        self.entries.iter().find(|entry| {
            entry.model == model && entry.batch == batch && entry.budget == budget
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Serialize to the cache blob form.
    pub fn to_bytes(&self) -> PlanResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PlanError::Serialization(e.to_string()))
    }

    /// Parse a cache blob produced by [`PlacementPlan::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> PlanResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PlanError::Serialization(e.to_string()))
    }

    /// Save the plan to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PlanResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PlanError::Serialization(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| PlanError::Io(e.to_string()))?;
        }
        let mut file =
            std::fs::File::create(path).map_err(|e| PlanError::Io(e.to_string()))?;
        file.write_all(json.as_bytes())
            .map_err(|e| PlanError::Io(e.to_string()))?;
        Ok(())
    }

    /// Load a plan from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> PlanResult<Self> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| PlanError::Io(format!("failed to open plan file: {}", e)))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| PlanError::Io(e.to_string()))?;
        serde_json::from_str(&contents)
            .map_err(|e| PlanError::Serialization(format!("invalid plan JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> PlacementPlan {
        let mut plan = PlacementPlan::new();
        plan.insert(
            PlanEntry::new("resnet34", 1, 4096)
                .with_offset("conv1.out", 0)
                .with_offset("bn1.out", 1024)
                .with_offset("fc.out", 2048),
        );
        plan.insert(PlanEntry::new("resnet34", 8, 32768).with_offset("conv1.out", 0));
        plan
    }

    #[test]
    fn test_find_is_exact_on_all_three_keys() {
        let plan = sample_plan();
        assert!(plan.find("resnet34", 1, 4096).is_some());
        assert!(plan.find("resnet34", 1, 8192).is_none());
        assert!(plan.find("resnet34", 2, 4096).is_none());
        assert!(plan.find("mobilenet", 1, 4096).is_none());
    }

    #[test]
    fn test_insert_replaces_same_key() {
        let mut plan = sample_plan();
        plan.insert(PlanEntry::new("resnet34", 1, 4096).with_offset("conv1.out", 512));
        assert_eq!(plan.len(), 2);
        let entry = plan.find("resnet34", 1, 4096).unwrap();
        assert_eq!(entry.offsets["conv1.out"], 512);
        assert!(!entry.offsets.contains_key("fc.out"));
    }

    #[test]
    fn test_bytes_round_trip_is_lossless() {
        let plan = sample_plan();
        let bytes = plan.to_bytes().unwrap();
        let parsed = PlacementPlan::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(PlacementPlan::from_bytes(b"not json").is_err());
    }
}
