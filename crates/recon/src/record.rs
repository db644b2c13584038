use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// One of the two sources being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Master,
    Slave,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Master => Self::Slave,
            Self::Slave => Self::Master,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Slave => write!(f, "slave"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A single parsed row from either source.
///
/// Blank strings stand for "no value". Records are never mutated by the
/// engine; updates are written into copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub index: String,
    pub rowcount: usize,
    pub columns: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_mod_time: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slave_mod_time: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transaction_time: Option<NaiveDateTime>,
}

impl Record {
    pub fn new(index: impl Into<String>, rowcount: usize) -> Self {
        Self {
            index: index.into(),
            rowcount,
            columns: IndexMap::new(),
            master_mod_time: None,
            slave_mod_time: None,
            last_transaction_time: None,
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    pub fn with_mod_time(mut self, side: Side, time: NaiveDateTime) -> Self {
        match side {
            Side::Master => self.master_mod_time = Some(time),
            Side::Slave => self.slave_mod_time = Some(time),
        }
        self
    }

    pub fn with_transaction_time(mut self, time: NaiveDateTime) -> Self {
        self.last_transaction_time = Some(time);
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }

    /// Column value, blank when the column is absent.
    pub fn value(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Overall modification time as recorded by `side`.
    pub fn mod_time(&self, side: Side) -> Option<NaiveDateTime> {
        match side {
            Side::Master => self.master_mod_time,
            Side::Slave => self.slave_mod_time,
        }
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse a timestamp in one of the formats both sources are known to emit.
/// A bare date is read as midnight.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ---------------------------------------------------------------------------
// Key functions
// ---------------------------------------------------------------------------

/// Computes the identity key of a record. A blank key means "unkeyed".
pub type KeyFn = Arc<dyn Fn(&Record) -> String + Send + Sync>;

/// Keeps a record in consideration when it returns `true`.
pub type RecordFilter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Key by the record's own source index.
pub fn index_key() -> KeyFn {
    Arc::new(|r: &Record| r.index.clone())
}

/// Key by the trimmed value of `column`.
pub fn column_key(column: &str) -> KeyFn {
    let column = column.to_string();
    Arc::new(move |r: &Record| r.value(&column).trim().to_string())
}

/// Key by the trimmed, lowercased value of `column`.
pub fn normalized_column_key(column: &str) -> KeyFn {
    let column = column.to_string();
    Arc::new(move |r: &Record| r.value(&column).trim().to_lowercase())
}

// ---------------------------------------------------------------------------
// Registers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterMode {
    /// One record per key.
    Singular,
    /// Any number of records per key; collisions become duplicate matches.
    Nonsingular,
}

/// Records of one source keyed by a key function, in first-seen order.
#[derive(Debug, Clone)]
pub enum Register {
    Singular(IndexMap<String, Record>),
    Nonsingular(IndexMap<String, Vec<Record>>),
}

/// Outcome of keying one source.
#[derive(Debug, Clone)]
pub struct KeyedRecords {
    pub register: Register,
    /// Records whose key came out blank.
    pub unkeyed: Vec<Record>,
    /// Records kept out of a singular register because their key was taken.
    pub collisions: Vec<Record>,
}

impl Register {
    pub fn empty(mode: RegisterMode) -> Self {
        match mode {
            RegisterMode::Singular => Self::Singular(IndexMap::new()),
            RegisterMode::Nonsingular => Self::Nonsingular(IndexMap::new()),
        }
    }

    pub fn build<'a, I>(records: I, key_fn: &KeyFn, mode: RegisterMode) -> KeyedRecords
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut register = Self::empty(mode);
        let mut unkeyed = Vec::new();
        let mut collisions = Vec::new();

        for record in records {
            let key = key_fn(record);
            if key.is_empty() {
                unkeyed.push(record.clone());
                continue;
            }
            match &mut register {
                Self::Singular(map) => {
                    if map.contains_key(&key) {
                        collisions.push(record.clone());
                    } else {
                        map.insert(key, record.clone());
                    }
                }
                Self::Nonsingular(map) => map.entry(key).or_default().push(record.clone()),
            }
        }

        KeyedRecords {
            register,
            unkeyed,
            collisions,
        }
    }

    /// Remove `key` and return the records it held.
    pub fn take(&mut self, key: &str) -> Vec<Record> {
        match self {
            Self::Singular(map) => map.shift_remove(key).into_iter().collect(),
            Self::Nonsingular(map) => map.shift_remove(key).unwrap_or_default(),
        }
    }

    pub fn mode(&self) -> RegisterMode {
        match self {
            Self::Singular(_) => RegisterMode::Singular,
            Self::Nonsingular(_) => RegisterMode::Nonsingular,
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Singular(map) => map.keys().map(String::as_str).collect(),
            Self::Nonsingular(map) => map.keys().map(String::as_str).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Vec<&Record> {
        match self {
            Self::Singular(map) => map.get(key).into_iter().collect(),
            Self::Nonsingular(map) => map.get(key).map(|v| v.iter().collect()).unwrap_or_default(),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        match self {
            Self::Singular(map) => map.contains_key(key),
            Self::Nonsingular(map) => map.contains_key(key),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Singular(map) => map.len(),
            Self::Nonsingular(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
