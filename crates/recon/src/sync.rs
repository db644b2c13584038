//! Column-level synchronization of one master/slave pair.
//!
//! A [`SyncUpdate`] walks the declared columns in order and, for each,
//! either records a pass (values already agree) or picks a winner and copies
//! the winning value into a lazily-created copy of the losing record. Every
//! decision is appended to a per-column log; nothing is ever overwritten.

use std::sync::Arc;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;

use crate::config::{
    delta_column, leaf_columns, tracking_column, ColumnPolicies, ColumnPolicy, SyncMode,
    SyncSettings,
};
use crate::error::ReconError;
use crate::record::{parse_timestamp, Record, Side};
use crate::similarity::{sanitize, similar, ColumnClass, ContactAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Identical,
    Similar,
    Merging,
    Inserting,
    Updating,
    Deleting,
}

impl Reason {
    /// Updates that overwrite existing data.
    pub fn is_important(self) -> bool {
        matches!(self, Self::Updating | Self::Deleting)
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identical => write!(f, "identical"),
            Self::Similar => write!(f, "similar"),
            Self::Merging => write!(f, "merging"),
            Self::Inserting => write!(f, "inserting"),
            Self::Updating => write!(f, "updating"),
            Self::Deleting => write!(f, "deleting"),
        }
    }
}

/// One recorded decision about one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub column: String,
    /// Winning side. For passes, the pair's overall winner.
    pub side: Side,
    pub subject: String,
    pub reason: Reason,
    /// Losing value before the update. For passes, the master value.
    pub old_value: String,
    /// Winning value. For passes, the slave value.
    pub new_value: String,
    pub master_time: Option<NaiveDateTime>,
    pub slave_time: Option<NaiveDateTime>,
    pub warn: bool,
    /// Both sides edited the column after the last sync.
    pub conflict: bool,
    pub policy: ColumnPolicy,
}

pub type DecisionLog = IndexMap<String, Vec<Decision>>;

/// Pick the side with the newer time. Ties go to the slave; a missing time
/// loses to a present one.
pub fn winner_by_time(master: Option<NaiveDateTime>, slave: Option<NaiveDateTime>) -> Side {
    match (master, slave) {
        (_, None) => Side::Master,
        (None, Some(_)) => Side::Slave,
        (Some(m), Some(s)) => {
            if s >= m {
                Side::Slave
            } else {
                Side::Master
            }
        }
    }
}

/// Values and times of one column on both sides.
struct ColumnState {
    column: String,
    leaves: Vec<String>,
    master_value: String,
    slave_value: String,
    master_time: Option<NaiveDateTime>,
    slave_time: Option<NaiveDateTime>,
    conflict: bool,
}

impl ColumnState {
    fn value(&self, side: Side) -> &str {
        match side {
            Side::Master => &self.master_value,
            Side::Slave => &self.slave_value,
        }
    }

    /// The column is only a name for its component columns.
    fn is_plain(&self) -> bool {
        self.leaves.len() == 1 && self.leaves[0] == self.column
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

#[derive(Debug, Clone)]
pub struct SyncUpdate {
    settings: Arc<SyncSettings>,
    pub old_master: Record,
    pub old_slave: Record,
    pub master_time: Option<NaiveDateTime>,
    pub slave_time: Option<NaiveDateTime>,
    pub last_sale_time: Option<NaiveDateTime>,
    pub last_sync: Option<NaiveDateTime>,
    pub winner: Side,
    pub new_master: Option<Record>,
    pub new_slave: Option<Record>,
    pub updates: usize,
    pub important_updates: usize,
    pub important_columns: Vec<String>,
    /// No `static` column has changed.
    pub is_static: bool,
    /// No `static` column has been overwritten or deleted.
    pub important_static: bool,
    pub sync_warnings: DecisionLog,
    pub sync_passes: DecisionLog,
    pub sync_problematics: DecisionLog,
    pub master_delta: bool,
    pub slave_delta: bool,
}

impl SyncUpdate {
    pub fn new(settings: Arc<SyncSettings>, old_master: Record, old_slave: Record) -> Self {
        Self::with_last_sync(settings, old_master, old_slave, None)
    }

    /// `last_sync` falls back to the settings' default when `None`.
    pub fn with_last_sync(
        settings: Arc<SyncSettings>,
        old_master: Record,
        old_slave: Record,
        last_sync: Option<NaiveDateTime>,
    ) -> Self {
        let master_time = old_master.mod_time(Side::Master);
        let slave_time = old_slave.mod_time(Side::Slave);
        let last_sale_time = old_master
            .last_transaction_time
            .or(old_slave.last_transaction_time);
        let last_sync = last_sync.or(settings.default_last_sync);

        Self {
            winner: winner_by_time(master_time, slave_time),
            settings,
            old_master,
            old_slave,
            master_time,
            slave_time,
            last_sale_time,
            last_sync,
            new_master: None,
            new_slave: None,
            updates: 0,
            important_updates: 0,
            important_columns: Vec::new(),
            is_static: true,
            important_static: true,
            sync_warnings: DecisionLog::new(),
            sync_passes: DecisionLog::new(),
            sync_problematics: DecisionLog::new(),
            master_delta: false,
            slave_delta: false,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn name(&self, side: Side) -> &str {
        self.settings.name(side)
    }

    pub fn winner_name(&self) -> &str {
        self.name(self.winner)
    }

    pub fn old_record(&self, side: Side) -> &Record {
        match side {
            Side::Master => &self.old_master,
            Side::Slave => &self.old_slave,
        }
    }

    pub fn new_record(&self, side: Side) -> Option<&Record> {
        match side {
            Side::Master => self.new_master.as_ref(),
            Side::Slave => self.new_slave.as_ref(),
        }
    }

    pub fn overall_time(&self, side: Side) -> Option<NaiveDateTime> {
        match side {
            Side::Master => self.master_time,
            Side::Slave => self.slave_time,
        }
    }

    /// The side's record changed after the last successful sync.
    pub fn edited_since_sync(&self, side: Side) -> bool {
        match (self.overall_time(side), self.last_sync) {
            (Some(time), Some(last_sync)) => time > last_sync,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn has_updates(&self) -> bool {
        self.updates > 0
    }

    /// A human should look at this pair before its updates are applied.
    pub fn needs_review(&self) -> bool {
        !self.important_static
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    /// Reconcile every synchronized column, in declared order.
    pub fn update(&mut self, columns: &ColumnPolicies) -> Result<(), ReconError> {
        for (column, policy) in columns {
            if !policy.sync.is_enabled() {
                continue;
            }
            self.update_column(column, policy, columns)?;
        }
        log::debug!(
            "{} <-> {}: {} updates ({} important), winner {}",
            self.old_master.index,
            self.old_slave.index,
            self.updates,
            self.important_updates,
            self.winner_name(),
        );
        Ok(())
    }

    pub fn update_column(
        &mut self,
        column: &str,
        policy: &ColumnPolicy,
        policies: &ColumnPolicies,
    ) -> Result<(), ReconError> {
        let state = self.column_state(column, policy, policies)?;

        if state.master_value == state.slave_value {
            self.record_pass(&state, policy, Reason::Identical);
            return Ok(());
        }

        if !policy.sync.is_override() && self.column_similar(&state) {
            self.record_pass(&state, policy, Reason::Similar);
            return Ok(());
        }

        let mut winner = winner_by_time(state.master_time, state.slave_time);
        let mut reason = None;
        if let Some(forced) = policy.sync.forced_winner() {
            winner = forced;
        } else if self.settings.mode == SyncMode::Merge
            && is_blank(state.value(winner))
            && !is_blank(state.value(winner.opposite()))
        {
            winner = winner.opposite();
            reason = Some(Reason::Merging);
        }

        let reason = reason.unwrap_or_else(|| {
            if is_blank(state.value(winner)) {
                Reason::Deleting
            } else if is_blank(state.value(winner.opposite())) {
                Reason::Inserting
            } else {
                Reason::Updating
            }
        });

        self.loser_update(&state, policy, winner, reason);
        Ok(())
    }

    fn column_state(
        &self,
        column: &str,
        policy: &ColumnPolicy,
        policies: &ColumnPolicies,
    ) -> Result<ColumnState, ReconError> {
        let leaves = leaf_columns(column, policies)?;
        let class = ColumnClass::of(column);
        let master_time = self.column_time(Side::Master, column, policy);
        let slave_time = self.column_time(Side::Slave, column, policy);
        let conflict = match self.last_sync {
            Some(last_sync) => {
                master_time.is_some_and(|t| t > last_sync) && slave_time.is_some_and(|t| t > last_sync)
            }
            None => false,
        };

        Ok(ColumnState {
            master_value: sanitize(class, &self.raw_value(Side::Master, column, &leaves)),
            slave_value: sanitize(class, &self.raw_value(Side::Slave, column, &leaves)),
            column: column.to_string(),
            leaves,
            master_time,
            slave_time,
            conflict,
        })
    }

    /// A composite column's value is its non-blank leaves joined.
    fn raw_value(&self, side: Side, column: &str, leaves: &[String]) -> String {
        let record = self.old_record(side);
        if record.has_column(column) || leaves.is_empty() {
            return record.value(column).to_string();
        }
        leaves
            .iter()
            .map(|leaf| record.value(leaf).trim())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Tracked columns carry their own edit time; otherwise the record's.
    fn column_time(&self, side: Side, column: &str, policy: &ColumnPolicy) -> Option<NaiveDateTime> {
        if policy.tracked {
            let tracked = self
                .old_record(side)
                .get(&tracking_column(column))
                .and_then(parse_timestamp);
            if tracked.is_some() {
                return tracked;
            }
        }
        self.overall_time(side)
    }

    fn column_similar(&self, state: &ColumnState) -> bool {
        let class = ColumnClass::of(&state.column);
        if class == ColumnClass::Address
            && !state.is_plain()
            && !is_blank(&state.master_value)
            && !is_blank(&state.slave_value)
        {
            let master = ContactAddress::from_record(&self.old_master, &state.leaves);
            let slave = ContactAddress::from_record(&self.old_slave, &state.leaves);
            return master.similar(&slave);
        }
        similar(class, &state.master_value, &state.slave_value)
    }

    fn new_record_mut(&mut self, side: Side) -> &mut Record {
        let (slot, old) = match side {
            Side::Master => (&mut self.new_master, &self.old_master),
            Side::Slave => (&mut self.new_slave, &self.old_slave),
        };
        slot.get_or_insert_with(|| old.clone())
    }

    fn loser_update(&mut self, state: &ColumnState, policy: &ColumnPolicy, winner: Side, reason: Reason) {
        let loser = winner.opposite();
        let source = self.old_record(winner);
        let mut writes: Vec<(String, String)> = Vec::new();
        if state.is_plain() || source.has_column(&state.column) || self.old_record(loser).has_column(&state.column) {
            writes.push((state.column.clone(), source.value(&state.column).to_string()));
        }
        if !state.is_plain() {
            for leaf in &state.leaves {
                writes.push((leaf.clone(), source.value(leaf).to_string()));
            }
        }

        let stash_delta = policy.delta && reason.is_important();
        let target = self.new_record_mut(loser);
        if stash_delta {
            target.set(delta_column(&state.column), state.value(loser));
        }
        for (column, value) in writes {
            target.set(column, value);
        }
        if stash_delta {
            match loser {
                Side::Master => self.master_delta = true,
                Side::Slave => self.slave_delta = true,
            }
        }

        let decision = self.decision(
            state,
            policy,
            winner,
            reason,
            state.value(loser).to_string(),
            state.value(winner).to_string(),
        );
        log::debug!(
            "{}: {} wins '{}' ({reason})",
            self.old_master.index,
            decision.subject,
            state.column,
        );

        if policy.is_static {
            self.is_static = false;
            if reason.is_important() {
                self.important_static = false;
                log::warn!(
                    "{} <-> {}: static column '{}' is {reason}",
                    self.old_master.index,
                    self.old_slave.index,
                    state.column,
                );
                self.sync_problematics
                    .entry(state.column.clone())
                    .or_default()
                    .push(decision.clone());
            }
        }

        self.sync_warnings
            .entry(state.column.clone())
            .or_default()
            .push(decision);

        self.updates += 1;
        if reason.is_important() {
            self.important_updates += 1;
            self.important_columns.push(state.column.clone());
        }
    }

    fn record_pass(&mut self, state: &ColumnState, policy: &ColumnPolicy, reason: Reason) {
        let decision = self.decision(
            state,
            policy,
            self.winner,
            reason,
            state.master_value.clone(),
            state.slave_value.clone(),
        );
        self.sync_passes
            .entry(state.column.clone())
            .or_default()
            .push(decision);
    }

    fn decision(
        &self,
        state: &ColumnState,
        policy: &ColumnPolicy,
        side: Side,
        reason: Reason,
        old_value: String,
        new_value: String,
    ) -> Decision {
        Decision {
            column: state.column.clone(),
            side,
            subject: self.name(side).to_string(),
            reason,
            old_value,
            new_value,
            master_time: state.master_time,
            slave_time: state.slave_time,
            warn: policy.warn,
            conflict: state.conflict,
            policy: policy.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Upload payloads
    // -----------------------------------------------------------------------

    /// Column values to push to `target`: every writable column the other
    /// side won, expanded to leaf columns, plus delta trails.
    pub fn updates_for(
        &self,
        target: Side,
        policies: &ColumnPolicies,
    ) -> Result<IndexMap<String, String>, ReconError> {
        let mut payload = IndexMap::new();
        let Some(record) = self.new_record(target) else {
            return Ok(payload);
        };

        for (column, decisions) in &self.sync_warnings {
            if !decisions.iter().any(|d| d.side == target.opposite()) {
                continue;
            }
            let Some(policy) = policies.get(column) else {
                continue;
            };
            if !policy.writable {
                continue;
            }
            for leaf in leaf_columns(column, policies)? {
                if record.has_column(&leaf) {
                    payload.insert(leaf.clone(), record.value(&leaf).to_string());
                }
            }
            let delta = delta_column(column);
            if policy.delta {
                if let Some(value) = record.get(&delta) {
                    payload.insert(delta, value.to_string());
                }
            }
        }
        Ok(payload)
    }

    pub fn slave_updates(&self, policies: &ColumnPolicies) -> Result<IndexMap<String, String>, ReconError> {
        self.updates_for(Side::Slave, policies)
    }

    pub fn master_updates(&self, policies: &ColumnPolicies) -> Result<IndexMap<String, String>, ReconError> {
        self.updates_for(Side::Master, policies)
    }
}
