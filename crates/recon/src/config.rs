use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::matcher::{CARD_COLUMN, EMAIL_COLUMN, USERNAME_COLUMN};
use crate::record::Side;

// ---------------------------------------------------------------------------
// Column policy
// ---------------------------------------------------------------------------

/// Whether a column is synchronized, and whether one side always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSyncPolicy", into = "RawSyncPolicy")]
pub enum SyncPolicy {
    #[default]
    Disabled,
    Enabled,
    MasterOverride,
    SlaveOverride,
}

impl SyncPolicy {
    pub fn is_enabled(self) -> bool {
        self != Self::Disabled
    }

    pub fn is_override(self) -> bool {
        self.forced_winner().is_some()
    }

    pub fn forced_winner(self) -> Option<Side> {
        match self {
            Self::MasterOverride => Some(Side::Master),
            Self::SlaveOverride => Some(Side::Slave),
            Self::Disabled | Self::Enabled => None,
        }
    }
}

/// TOML form: `sync = true` or `sync = "master_override"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawSyncPolicy {
    Flag(bool),
    Named(String),
}

impl TryFrom<RawSyncPolicy> for SyncPolicy {
    type Error = String;

    fn try_from(raw: RawSyncPolicy) -> Result<Self, Self::Error> {
        match raw {
            RawSyncPolicy::Flag(true) => Ok(Self::Enabled),
            RawSyncPolicy::Flag(false) => Ok(Self::Disabled),
            RawSyncPolicy::Named(name) => match name.as_str() {
                "master_override" => Ok(Self::MasterOverride),
                "slave_override" => Ok(Self::SlaveOverride),
                other => Err(format!(
                    "unknown sync policy \"{other}\" (expected true, false, \"master_override\" or \"slave_override\")"
                )),
            },
        }
    }
}

impl From<SyncPolicy> for RawSyncPolicy {
    fn from(policy: SyncPolicy) -> Self {
        match policy {
            SyncPolicy::Disabled => Self::Flag(false),
            SyncPolicy::Enabled => Self::Flag(true),
            SyncPolicy::MasterOverride => Self::Named("master_override".into()),
            SyncPolicy::SlaveOverride => Self::Named("slave_override".into()),
        }
    }
}

/// How one column takes part in synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnPolicy {
    #[serde(default)]
    pub sync: SyncPolicy,
    /// Show applied updates of this column in reports.
    #[serde(default)]
    pub warn: bool,
    /// The column is expected not to change between syncs.
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// A `"Edited <col>"` column carries this column's own modification time.
    #[serde(default)]
    pub tracked: bool,
    /// Keep the overwritten value in a `"Delta <col>"` column.
    #[serde(default)]
    pub delta: bool,
    /// Component columns making up this column.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// The column may be pushed to the other side by uploaders.
    #[serde(default = "default_true")]
    pub writable: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ColumnPolicy {
    fn default() -> Self {
        Self {
            sync: SyncPolicy::Disabled,
            warn: false,
            is_static: false,
            tracked: false,
            delta: false,
            aliases: Vec::new(),
            writable: true,
        }
    }
}

impl ColumnPolicy {
    /// A synchronized, writable column.
    pub fn synced() -> Self {
        Self {
            sync: SyncPolicy::Enabled,
            ..Self::default()
        }
    }

    pub fn overridden_by(side: Side) -> Self {
        Self {
            sync: match side {
                Side::Master => SyncPolicy::MasterOverride,
                Side::Slave => SyncPolicy::SlaveOverride,
            },
            ..Self::default()
        }
    }

    pub fn warn(mut self) -> Self {
        self.warn = true;
        self
    }

    pub fn static_column(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn tracked(mut self) -> Self {
        self.tracked = true;
        self
    }

    pub fn delta(mut self) -> Self {
        self.delta = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }
}

pub type ColumnPolicies = IndexMap<String, ColumnPolicy>;

/// Column holding the pre-update value of `column`.
pub fn delta_column(column: &str) -> String {
    format!("Delta {column}")
}

/// Column holding the modification time of `column`.
pub fn tracking_column(column: &str) -> String {
    format!("Edited {column}")
}

/// Expand `column` through its alias chain down to plain columns.
///
/// A column without aliases is its own leaf.
pub fn leaf_columns(column: &str, policies: &ColumnPolicies) -> Result<Vec<String>, ReconError> {
    let mut leaves = Vec::new();
    let mut path = Vec::new();
    collect_leaves(column, policies, &mut path, &mut leaves)?;
    Ok(leaves)
}

fn collect_leaves(
    column: &str,
    policies: &ColumnPolicies,
    path: &mut Vec<String>,
    leaves: &mut Vec<String>,
) -> Result<(), ReconError> {
    if path.iter().any(|c| c == column) {
        return Err(ReconError::AliasCycle {
            column: column.to_string(),
        });
    }
    let aliases = policies
        .get(column)
        .map(|p| p.aliases.as_slice())
        .unwrap_or_default();
    if aliases.is_empty() {
        if !leaves.iter().any(|c| c == column) {
            leaves.push(column.to_string());
        }
        return Ok(());
    }
    path.push(column.to_string());
    for alias in aliases {
        collect_leaves(alias, policies, path, leaves)?;
    }
    path.pop();
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Newest edit wins, blanks included.
    #[default]
    Sync,
    /// A blank value never overwrites a filled one.
    Merge,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Run-wide settings shared by every `SyncUpdate`. Built once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSettings {
    pub master_name: String,
    pub slave_name: String,
    pub mode: SyncMode,
    pub default_last_sync: Option<NaiveDateTime>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::new("master", "slave")
    }
}

impl SyncSettings {
    pub fn new(master_name: impl Into<String>, slave_name: impl Into<String>) -> Self {
        Self {
            master_name: master_name.into(),
            slave_name: slave_name.into(),
            mode: SyncMode::Sync,
            default_last_sync: None,
        }
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_last_sync(mut self, last_sync: NaiveDateTime) -> Self {
        self.default_last_sync = Some(last_sync);
        self
    }

    pub fn name(&self, side: Side) -> &str {
        match side {
            Side::Master => &self.master_name,
            Side::Slave => &self.slave_name,
        }
    }
}

// ---------------------------------------------------------------------------
// Run config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub name: String,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default = "default_master_name")]
    pub master_name: String,
    #[serde(default = "default_slave_name")]
    pub slave_name: String,
    /// Last successful sync, `YYYY-MM-DDTHH:MM:SS`.
    #[serde(default)]
    pub last_sync: Option<NaiveDateTime>,
    pub master: SourceConfig,
    pub slave: SourceConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    pub columns: ColumnPolicies,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_master_name() -> String {
    "master".into()
}

fn default_slave_name() -> String {
    "slave".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub file: String,
    /// Column holding the record's identity within its source.
    pub index: String,
    /// Column holding the record's overall modification time.
    #[serde(default)]
    pub mod_time: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
    /// chrono format for the time columns; common layouts are tried when unset.
    #[serde(default)]
    pub time_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPass {
    Username,
    Card,
    Email,
}

impl MatchPass {
    /// How suspicious a collision on this key is.
    pub fn duplicate_weighting(self) -> f64 {
        match self {
            Self::Card => 2.0,
            Self::Username => 1.0,
            Self::Email => 0.5,
        }
    }
}

impl std::fmt::Display for MatchPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Username => write!(f, "username"),
            Self::Card => write!(f, "card"),
            Self::Email => write!(f, "email"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_passes")]
    pub passes: Vec<MatchPass>,
    #[serde(default = "default_username_column")]
    pub username: String,
    #[serde(default = "default_card_column")]
    pub card: String,
    #[serde(default = "default_email_column")]
    pub email: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            passes: default_passes(),
            username: default_username_column(),
            card: default_card_column(),
            email: default_email_column(),
        }
    }
}

fn default_passes() -> Vec<MatchPass> {
    vec![MatchPass::Username, MatchPass::Card, MatchPass::Email]
}

fn default_username_column() -> String {
    USERNAME_COLUMN.into()
}

fn default_card_column() -> String {
    CARD_COLUMN.into()
}

fn default_email_column() -> String {
    EMAIL_COLUMN.into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl SyncConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: SyncConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.master_name.trim().is_empty() || self.slave_name.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "master_name and slave_name must not be blank".into(),
            ));
        }
        if self.master_name == self.slave_name {
            return Err(ReconError::ConfigValidation(format!(
                "master_name and slave_name must differ, both are '{}'",
                self.master_name
            )));
        }

        if self.matching.passes.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one matching pass is required".into(),
            ));
        }
        for (i, pass) in self.matching.passes.iter().enumerate() {
            if self.matching.passes[..i].contains(pass) {
                return Err(ReconError::ConfigValidation(format!(
                    "matching pass '{pass}' is listed more than once"
                )));
            }
        }

        if self.columns.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one column policy is required".into(),
            ));
        }
        for column in self.columns.keys() {
            leaf_columns(column, &self.columns)?;
        }

        Ok(())
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            master_name: self.master_name.clone(),
            slave_name: self.slave_name.clone(),
            mode: self.mode,
            default_last_sync: self.last_sync,
        }
    }

    pub fn source(&self, side: Side) -> &SourceConfig {
        match side {
            Side::Master => &self.master,
            Side::Slave => &self.slave,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
