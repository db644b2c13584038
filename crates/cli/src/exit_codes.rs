//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! # Exit Codes
//!
//! | Code | Meaning                                                     |
//! |------|-------------------------------------------------------------|
//! | 0    | Success: every record paired, nothing needs review          |
//! | 1    | Findings: anomalies or updates to static columns            |
//! | 2    | Invalid config (parse error, failed validation)             |
//! | 3    | Runtime error (unreadable file, bad CSV, timestamp parse)   |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

/// Success - command completed without findings.
pub const EXIT_SUCCESS: u8 = 0;

/// The run completed but left masterless, slaveless or duplicate records,
/// or changed a static column. Like `diff(1)`, exit 1 means "look at this".
pub const EXIT_SYNC_FINDINGS: u8 = 1;

/// Config could not be parsed or failed validation.
pub const EXIT_SYNC_INVALID_CONFIG: u8 = 2;

/// Reading inputs, loading records or writing output failed.
pub const EXIT_SYNC_RUNTIME: u8 = 3;

use mirrorsync_recon::ReconError;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) | ReconError::AliasCycle { .. } => {
            EXIT_SYNC_INVALID_CONFIG
        }
        ReconError::DuplicateIndex { .. }
        | ReconError::InconsistentIndex { .. }
        | ReconError::MissingColumn { .. }
        | ReconError::TimeParse { .. }
        | ReconError::Io(_) => EXIT_SYNC_RUNTIME,
    }
}
