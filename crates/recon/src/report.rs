use indexmap::IndexMap;
use serde::Serialize;

use crate::config::{ColumnPolicies, MatchPass, SyncMode};
use crate::duplicates::Duplicates;
use crate::error::ReconError;
use crate::model::Match;
use crate::record::{Record, Side};
use crate::sync::{DecisionLog, SyncUpdate};

/// Input to a sync run: pre-loaded records of both sources.
#[derive(Debug, Clone, Default)]
pub struct SyncInput {
    pub master: Vec<Record>,
    pub slave: Vec<Record>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub meta: SyncMeta,
    pub summary: SyncSummary,
    pub outcomes: Vec<MatchOutcome>,
    pub anomalies: Anomalies,
}

impl SyncReport {
    /// Anything a human has to look at before applying the run.
    pub fn has_findings(&self) -> bool {
        self.summary.problematic > 0 || !self.anomalies.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncMeta {
    pub config_name: String,
    pub mode: SyncMode,
    pub master_name: String,
    pub slave_name: String,
    pub passes: Vec<MatchPass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<chrono::NaiveDateTime>,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub master_records: usize,
    pub slave_records: usize,
    pub pure: usize,
    pub masterless: usize,
    pub slaveless: usize,
    pub duplicate: usize,
    /// Records of either source with a blank or repeated index.
    pub unindexed: usize,
    /// Pure matches with at least one applied update.
    pub updated: usize,
    pub important_updates: usize,
    /// Pure matches that changed a static column.
    pub problematic: usize,
    /// Decisions on columns edited on both sides since the last sync.
    pub conflicts: usize,
    pub matched_by: IndexMap<MatchPass, usize>,
}

/// Result of synchronizing one pure match.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub pass: MatchPass,
    pub master_index: String,
    pub slave_index: String,
    pub winner: Side,
    pub winner_name: String,
    pub updates: usize,
    pub important_updates: usize,
    pub important_columns: Vec<String>,
    pub warnings: DecisionLog,
    pub passes: DecisionLog,
    pub problematics: DecisionLog,
    pub master_updates: IndexMap<String, String>,
    pub slave_updates: IndexMap<String, String>,
    pub needs_review: bool,
}

impl MatchOutcome {
    pub fn from_update(
        pass: MatchPass,
        update: &SyncUpdate,
        policies: &ColumnPolicies,
    ) -> Result<Self, ReconError> {
        Ok(Self {
            pass,
            master_index: update.old_master.index.clone(),
            slave_index: update.old_slave.index.clone(),
            winner: update.winner,
            winner_name: update.winner_name().to_string(),
            updates: update.updates,
            important_updates: update.important_updates,
            important_columns: update.important_columns.clone(),
            warnings: update.sync_warnings.clone(),
            passes: update.sync_passes.clone(),
            problematics: update.sync_problematics.clone(),
            master_updates: update.master_updates(policies)?,
            slave_updates: update.slave_updates(policies)?,
            needs_review: update.needs_review(),
        })
    }

    pub fn conflict_count(&self) -> usize {
        self.warnings
            .values()
            .flatten()
            .filter(|d| d.conflict)
            .count()
    }
}

/// Records no pass could pair up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Anomalies {
    /// Unclaimed slave records.
    pub masterless: Vec<Record>,
    /// Unclaimed master records.
    pub slaveless: Vec<Record>,
    /// Duplicate matches with members no pass resolved.
    pub duplicates: Vec<DuplicateMatch>,
    pub master_duplicates: Duplicates,
    pub slave_duplicates: Duplicates,
    /// Master records with a blank or repeated index, left out of matching.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub master_unindexed: Vec<Record>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub slave_unindexed: Vec<Record>,
}

impl Anomalies {
    pub fn is_empty(&self) -> bool {
        self.masterless.is_empty()
            && self.slaveless.is_empty()
            && self.duplicates.is_empty()
            && self.master_unindexed.is_empty()
            && self.slave_unindexed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatch {
    pub pass: MatchPass,
    pub key: String,
    #[serde(flatten)]
    pub records: Match,
}
