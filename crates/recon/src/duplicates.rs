//! Why records collided during matching.
//!
//! Reporting only: nothing here feeds back into matching or sync.

use indexmap::IndexMap;
use serde::Serialize;

use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateReason {
    pub weighting: f64,
    pub details: String,
}

/// One record and every reason it was found colliding with others.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateObject {
    pub record: Record,
    pub reasons: IndexMap<String, DuplicateReason>,
}

impl DuplicateObject {
    pub fn weighted_reason_count(&self) -> f64 {
        self.reasons.values().map(|r| r.weighting).sum()
    }
}

/// Duplicate records of one source, keyed by record index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Duplicates {
    objects: IndexMap<String, DuplicateObject>,
}

impl Duplicates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `records` collided for `reason`. Each record gets the
    /// reason once, naming the other members of the group.
    pub fn add_conflictors(&mut self, records: &[Record], reason: &str, weighting: f64) {
        for record in records {
            let others: Vec<&str> = records
                .iter()
                .map(Record::index)
                .filter(|index| *index != record.index())
                .collect();
            let object = self
                .objects
                .entry(record.index.clone())
                .or_insert_with(|| DuplicateObject {
                    record: record.clone(),
                    reasons: IndexMap::new(),
                });
            object
                .reasons
                .entry(reason.to_string())
                .or_insert_with(|| DuplicateReason {
                    weighting,
                    details: format!("conflicts with {}", others.join(", ")),
                });
        }
    }

    pub fn get(&self, index: &str) -> Option<&DuplicateObject> {
        self.objects.get(index)
    }

    /// Most suspicious first; equal weights keep insertion order.
    pub fn ranked(&self) -> Vec<&DuplicateObject> {
        let mut ranked: Vec<&DuplicateObject> = self.objects.values().collect();
        ranked.sort_by(|a, b| b.weighted_reason_count().total_cmp(&a.weighted_reason_count()));
        ranked
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
