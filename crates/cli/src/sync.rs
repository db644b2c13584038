//! `msync run` / `msync validate` - config-driven master/slave sync.

use std::path::{Path, PathBuf};

use mirrorsync_recon::engine::load_csv_records;
use mirrorsync_recon::{ReconError, Side, SyncConfig, SyncInput, SyncReport};

use crate::exit_codes::{recon_exit_code, EXIT_SYNC_FINDINGS, EXIT_SYNC_RUNTIME};
use crate::CliError;

fn sync_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn engine_err(err: ReconError) -> CliError {
    let hint = match &err {
        ReconError::MissingColumn { .. } => {
            Some("check the `index` and `mod_time` column names of that source".to_string())
        }
        ReconError::TimeParse { .. } => {
            Some("set `time_format` on the source to the layout its export uses".to_string())
        }
        ReconError::AliasCycle { .. } => {
            Some("an alias chain must end in plain columns".to_string())
        }
        _ => None,
    };
    CliError { code: recon_exit_code(&err), message: err.to_string(), hint }
}

fn load_config(config_path: &Path) -> Result<SyncConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| sync_err(EXIT_SYNC_RUNTIME, format!("cannot read config: {e}")))?;
    SyncConfig::from_toml(&config_str).map_err(engine_err)
}

/// Config-relative paths resolve against the config file's directory.
fn base_dir(config_path: &Path) -> &Path {
    config_path.parent().unwrap_or_else(|| Path::new("."))
}

fn load_input(config: &SyncConfig, base_dir: &Path) -> Result<SyncInput, CliError> {
    let mut input = SyncInput::default();
    for side in [Side::Master, Side::Slave] {
        let source = config.source(side);
        let csv_path = base_dir.join(&source.file);
        let csv_data = std::fs::read_to_string(&csv_path).map_err(|e| {
            sync_err(EXIT_SYNC_RUNTIME, format!("cannot read {}: {e}", csv_path.display()))
        })?;
        let records = load_csv_records(side, &csv_data, source).map_err(engine_err)?;
        log::info!("{side}: {} records from {}", records.len(), csv_path.display());
        match side {
            Side::Master => input.master = records,
            Side::Slave => input.slave = records,
        }
    }
    Ok(input)
}

pub fn cmd_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let base_dir = base_dir(&config_path);
    let input = load_input(&config, base_dir)?;

    let report = mirrorsync_recon::run(&config, &input).map_err(engine_err)?;

    // Output
    let json_str = serde_json::to_string_pretty(&report)
        .map_err(|e| sync_err(EXIT_SYNC_RUNTIME, format!("JSON serialization error: {e}")))?;

    let output_file = output_file.or_else(|| config.output.json.as_ref().map(|p| base_dir.join(p)));
    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| sync_err(EXIT_SYNC_RUNTIME, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    print_summary(&report);

    if report.has_findings() {
        return Err(sync_err(EXIT_SYNC_FINDINGS, "sync needs review"));
    }
    Ok(())
}

/// Human summary to stderr.
fn print_summary(report: &SyncReport) {
    let meta = &report.meta;
    let s = &report.summary;
    eprintln!(
        "'{}' ({} mode, {} -> {}): {} paired, {} updated ({} important), {} problematic",
        meta.config_name,
        meta.mode,
        meta.master_name,
        meta.slave_name,
        s.pure,
        s.updated,
        s.important_updates,
        s.problematic,
    );
    eprintln!(
        "unpaired: {} masterless, {} slaveless, {} duplicate",
        s.masterless, s.slaveless, s.duplicate,
    );
    if s.unindexed > 0 {
        eprintln!("{} record(s) with a blank or repeated index were not matched", s.unindexed);
    }
    if s.conflicts > 0 {
        eprintln!("{} column(s) edited on both sides since the last sync", s.conflicts);
    }

    for outcome in report.outcomes.iter().filter(|o| o.needs_review) {
        let columns: Vec<&str> = outcome.problematics.keys().map(String::as_str).collect();
        eprintln!(
            "  review {} <-> {}: static column(s) {}",
            outcome.master_index,
            outcome.slave_index,
            columns.join(", "),
        );
    }
    for dup in &report.anomalies.duplicates {
        eprintln!(
            "  duplicate {} '{}': {} {} / {} {}",
            dup.pass,
            dup.key,
            dup.records.master_records.len(),
            meta.master_name,
            dup.records.slave_records.len(),
            meta.slave_name,
        );
    }
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let passes: Vec<String> = config.matching.passes.iter().map(ToString::to_string).collect();
    let synced = config.columns.values().filter(|p| p.sync.is_enabled()).count();
    eprintln!(
        "valid: '{}' ({} mode, {} -> {}), passes: {}, {} of {} column(s) synchronized",
        config.name,
        config.mode,
        config.master_name,
        config.slave_name,
        passes.join(", "),
        synced,
        config.columns.len(),
    );
    Ok(())
}
