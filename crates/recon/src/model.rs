use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::ReconError;
use crate::record::{index_key, KeyFn, Record, Side};

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Empty,
    Masterless,
    Slaveless,
    Pure,
    Duplicate,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Masterless => write!(f, "masterless"),
            Self::Slaveless => write!(f, "slaveless"),
            Self::Pure => write!(f, "pure"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Master and slave records believed to describe the same entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Match {
    pub master_records: Vec<Record>,
    pub slave_records: Vec<Record>,
}

impl Match {
    pub fn new(master_records: Vec<Record>, slave_records: Vec<Record>) -> Self {
        Self {
            master_records,
            slave_records,
        }
    }

    /// Build from possibly-absent records, dropping the absent ones.
    pub fn from_optional<M, S>(masters: M, slaves: S) -> Self
    where
        M: IntoIterator<Item = Option<Record>>,
        S: IntoIterator<Item = Option<Record>>,
    {
        Self {
            master_records: masters.into_iter().flatten().collect(),
            slave_records: slaves.into_iter().flatten().collect(),
        }
    }

    pub fn records(&self, side: Side) -> &[Record] {
        match side {
            Side::Master => &self.master_records,
            Side::Slave => &self.slave_records,
        }
    }

    pub fn is_singular(&self) -> bool {
        self.master_records.len() <= 1 && self.slave_records.len() <= 1
    }

    pub fn match_type(&self) -> MatchType {
        let masters = self.master_records.len();
        let slaves = self.slave_records.len();
        if !self.is_singular() {
            return MatchType::Duplicate;
        }
        match (masters, slaves) {
            (0, 0) => MatchType::Empty,
            (0, _) => MatchType::Masterless,
            (_, 0) => MatchType::Slaveless,
            _ => MatchType::Pure,
        }
    }

    /// The sole master record of a singular match.
    pub fn master(&self) -> Option<&Record> {
        match self.master_records.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// The sole slave record of a singular match.
    pub fn slave(&self) -> Option<&Record> {
        match self.slave_records.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn add_master(&mut self, record: Record) {
        self.master_records.push(record);
    }

    pub fn add_slave(&mut self, record: Record) {
        self.slave_records.push(record);
    }

    pub fn len(&self) -> usize {
        self.master_records.len() + self.slave_records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split this match into sub-matches of records sharing `key_fn`,
    /// in first-seen key order. Used to disambiguate duplicates.
    pub fn find_key_matches(&self, key_fn: &KeyFn) -> Vec<Match> {
        let mut groups: IndexMap<String, Match> = IndexMap::new();
        for record in &self.master_records {
            groups.entry(key_fn(record)).or_default().add_master(record.clone());
        }
        for record in &self.slave_records {
            groups.entry(key_fn(record)).or_default().add_slave(record.clone());
        }
        groups.into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// MatchList
// ---------------------------------------------------------------------------

/// Ordered matches with no index shared between two matches on one side.
#[derive(Clone)]
pub struct MatchList {
    index_fn: KeyFn,
    matches: Vec<Match>,
    master_indices: HashSet<String>,
    slave_indices: HashSet<String>,
}

impl std::fmt::Debug for MatchList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchList")
            .field("matches", &self.matches)
            .field("master_indices", &self.master_indices)
            .field("slave_indices", &self.slave_indices)
            .finish()
    }
}

impl Default for MatchList {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchList {
    /// A list indexed by each record's own source index.
    pub fn new() -> Self {
        Self::with_index_fn(index_key())
    }

    pub fn with_index_fn(index_fn: KeyFn) -> Self {
        Self {
            index_fn,
            matches: Vec::new(),
            master_indices: HashSet::new(),
            slave_indices: HashSet::new(),
        }
    }

    pub fn add(&mut self, m: Match) -> Result<(), ReconError> {
        let master_index = self.side_index(Side::Master, &m.master_records)?;
        let slave_index = self.side_index(Side::Slave, &m.slave_records)?;
        if let Some(index) = master_index {
            self.master_indices.insert(index);
        }
        if let Some(index) = slave_index {
            self.slave_indices.insert(index);
        }
        self.matches.push(m);
        Ok(())
    }

    pub fn add_all<I>(&mut self, matches: I) -> Result<(), ReconError>
    where
        I: IntoIterator<Item = Match>,
    {
        for m in matches {
            self.add(m)?;
        }
        Ok(())
    }

    fn side_index(&self, side: Side, records: &[Record]) -> Result<Option<String>, ReconError> {
        let indices: Vec<String> = records.iter().map(|r| (self.index_fn)(r)).collect();
        let Some(first) = indices.first() else {
            return Ok(None);
        };

        let taken = match side {
            Side::Master => &self.master_indices,
            Side::Slave => &self.slave_indices,
        };
        if let Some(index) = indices.iter().find(|i| taken.contains(*i)) {
            return Err(ReconError::DuplicateIndex {
                side,
                index: index.clone(),
            });
        }
        if indices.iter().any(|i| i != first) {
            return Err(ReconError::InconsistentIndex { side, indices });
        }
        Ok(Some(first.clone()))
    }

    /// Flatten every match into one, for displaying a whole bucket.
    pub fn merge(&self) -> Match {
        let mut merged = Match::default();
        for m in &self.matches {
            merged.master_records.extend(m.master_records.iter().cloned());
            merged.slave_records.extend(m.slave_records.iter().cloned());
        }
        merged
    }

    pub fn contains_index(&self, side: Side, index: &str) -> bool {
        match side {
            Side::Master => self.master_indices.contains(index),
            Side::Slave => self.slave_indices.contains(index),
        }
    }

    pub fn indices(&self, side: Side) -> &HashSet<String> {
        match side {
            Side::Master => &self.master_indices,
            Side::Slave => &self.slave_indices,
        }
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Match> {
        self.matches.iter()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

impl<'a> IntoIterator for &'a MatchList {
    type Item = &'a Match;
    type IntoIter = std::slice::Iter<'a, Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.matches.iter()
    }
}
