//! `mirrorsync-recon` - record matching and column-level sync decisions
//! between a master and a slave source.
//!
//! Pure engine crate: receives pre-loaded records, returns matches, per-column
//! decisions and upload payloads. No CLI dependencies; the only IO is parsing
//! CSV text the caller already read.

pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod record;
pub mod report;
pub mod similarity;
pub mod summary;
pub mod sync;

pub use config::{ColumnPolicies, ColumnPolicy, SyncConfig, SyncMode, SyncPolicy, SyncSettings};
pub use engine::{load_csv_records, run, run_matcher_chain};
pub use error::ReconError;
pub use model::{Match, MatchList, MatchType};
pub use record::{Record, Side};
pub use report::{SyncInput, SyncReport};
pub use sync::{Decision, Reason, SyncUpdate};
