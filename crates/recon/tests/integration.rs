use std::path::PathBuf;

use mirrorsync_recon::config::{MatchPass, SyncConfig};
use mirrorsync_recon::engine::{load_csv_records, run};
use mirrorsync_recon::record::Side;
use mirrorsync_recon::report::{MatchOutcome, SyncInput, SyncReport};
use mirrorsync_recon::sync::Reason;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_and_run(config_toml: &str) -> SyncReport {
    let dir = fixtures_dir();
    let config = SyncConfig::from_toml(config_toml).unwrap();

    let mut input = SyncInput::default();
    for side in [Side::Master, Side::Slave] {
        let source = config.source(side);
        let csv_path = dir.join(&source.file);
        let csv_data = std::fs::read_to_string(&csv_path)
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", csv_path.display()));
        let records = load_csv_records(side, &csv_data, source).unwrap();
        match side {
            Side::Master => input.master = records,
            Side::Slave => input.slave = records,
        }
    }

    run(&config, &input).unwrap()
}

fn fixture_config() -> String {
    std::fs::read_to_string(fixtures_dir().join("act-wp.sync.toml")).unwrap()
}

fn outcome<'a>(report: &'a SyncReport, master_index: &str) -> &'a MatchOutcome {
    report
        .outcomes
        .iter()
        .find(|o| o.master_index == master_index)
        .unwrap_or_else(|| panic!("no outcome for {master_index}"))
}

// -------------------------------------------------------------------------
// Matching
// -------------------------------------------------------------------------

#[test]
fn summary_counts() {
    let report = load_and_run(&fixture_config());

    assert_eq!(report.meta.config_name, "Act to WordPress");
    assert_eq!(report.meta.master_name, "act");
    assert_eq!(report.summary.master_records, 6);
    assert_eq!(report.summary.slave_records, 5);
    assert_eq!(report.summary.pure, 4);
    assert_eq!(report.summary.updated, 4);
    assert_eq!(report.summary.important_updates, 6);
    assert_eq!(report.summary.problematic, 1);
    assert_eq!(report.summary.conflicts, 2);
    assert_eq!(report.summary.masterless, 1);
    assert_eq!(report.summary.slaveless, 2);
    assert_eq!(report.summary.duplicate, 0);
    assert!(report.has_findings());
}

#[test]
fn passes_claim_in_order() {
    let report = load_and_run(&fixture_config());
    let by = &report.summary.matched_by;
    assert_eq!(by[&MatchPass::Username], 1);
    assert_eq!(by[&MatchPass::Card], 1);
    assert_eq!(by[&MatchPass::Email], 2);

    assert_eq!(outcome(&report, "C000128").slave_index, "1077");
    assert_eq!(outcome(&report, "C000129").slave_index, "1078");
    assert_eq!(outcome(&report, "C000130").pass, MatchPass::Email);
}

#[test]
fn leftovers_become_anomalies() {
    let report = load_and_run(&fixture_config());
    let anomalies = &report.anomalies;

    let slaveless: Vec<_> = anomalies.slaveless.iter().map(|r| r.index.as_str()).collect();
    assert_eq!(slaveless, vec!["C000132", "C000133"]);
    let masterless: Vec<_> = anomalies.masterless.iter().map(|r| r.index.as_str()).collect();
    assert_eq!(masterless, vec!["1081"]);

    // The username collision on "bob" was settled by the email pass.
    assert!(anomalies.duplicates.is_empty());
    assert_eq!(anomalies.master_duplicates.len(), 2);
    assert!(anomalies.slave_duplicates.is_empty());
}

// -------------------------------------------------------------------------
// Sync decisions
// -------------------------------------------------------------------------

#[test]
fn newer_master_updates_slave() {
    let report = load_and_run(&fixture_config());
    let derwent = outcome(&report, "C000128");

    assert_eq!(derwent.winner, Side::Master);
    let warning = &derwent.warnings["First Name"][0];
    assert_eq!(warning.subject, "act");
    assert_eq!(warning.reason, Reason::Updating);
    assert_eq!(derwent.slave_updates["First Name"], "Derwent");
    assert_eq!(derwent.slave_updates.len(), 1);
    assert!(derwent.master_updates.is_empty());

    assert_eq!(derwent.passes["Role"][0].reason, Reason::Similar);
    assert_eq!(derwent.passes["Phone"][0].reason, Reason::Similar);
    assert_eq!(derwent.passes["Address"][0].reason, Reason::Identical);
    assert!(!derwent.passes.contains_key("Notes"));
}

#[test]
fn override_and_static_columns() {
    let report = load_and_run(&fixture_config());
    let jane = outcome(&report, "C000129");

    assert_eq!(jane.winner, Side::Slave);
    assert_eq!(jane.master_updates["Surname"], "Doe-Smith");
    // Role is forced to the master's value but never uploaded.
    assert_eq!(jane.warnings["Role"][0].new_value, "ADMIN");
    assert!(jane.slave_updates.is_empty());

    assert!(jane.needs_review);
    assert_eq!(jane.problematics.len(), 1);
    assert_eq!(jane.problematics["Surname"].len(), 1);
    assert!(jane.warnings["Surname"][0].conflict);
    assert_eq!(jane.passes["Address"][0].reason, Reason::Similar);
}

#[test]
fn inserts_and_ties() {
    let report = load_and_run(&fixture_config());

    let kim = outcome(&report, "C000130");
    assert_eq!(kim.warnings["Phone"][0].reason, Reason::Inserting);
    assert_eq!(kim.master_updates["Phone"], "0400 111 222");
    assert!(!kim.master_updates.contains_key("Delta Phone"));
    assert_eq!(kim.important_columns, vec!["First Name"]);

    let bob = outcome(&report, "C000131");
    assert_eq!(bob.winner, Side::Slave);
    assert_eq!(bob.master_updates["First Name"], "Robert");
    assert_eq!(bob.warnings["Phone"][0].reason, Reason::Deleting);
    assert_eq!(bob.master_updates["Phone"], "");
    assert_eq!(bob.master_updates["Delta Phone"], "0400 999 888");
}

#[test]
fn merge_mode_keeps_values() {
    let config = fixture_config().replace("mode = \"sync\"", "mode = \"merge\"");
    let report = load_and_run(&config);

    // Bob's slave phone is blank: merging keeps the master's number.
    let bob = outcome(&report, "C000131");
    assert_eq!(bob.warnings["Phone"][0].side, Side::Master);
    assert_eq!(bob.warnings["Phone"][0].reason, Reason::Merging);
    assert_eq!(bob.slave_updates["Phone"], "0400 999 888");
    assert!(!bob.master_updates.contains_key("Phone"));

    let kim = outcome(&report, "C000130");
    assert_eq!(kim.warnings["Phone"][0].reason, Reason::Inserting);
    assert_eq!(report.summary.important_updates, 5);
}

#[test]
fn report_serializes() {
    let report = load_and_run(&fixture_config());
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["summary"]["pure"], 4);
    assert_eq!(json["summary"]["matched_by"]["email"], 2);
    assert_eq!(json["meta"]["mode"], "sync");
    assert_eq!(json["outcomes"][0]["winner"], "master");
    assert_eq!(
        json["outcomes"][0]["warnings"]["First Name"][0]["reason"],
        "updating"
    );
    assert_eq!(json["anomalies"]["masterless"][0]["index"], "1081");
}

#[test]
fn repeated_runs_agree() {
    let a = load_and_run(&fixture_config());
    let b = load_and_run(&fixture_config());
    assert_eq!(a.summary, b.summary);
    for (x, y) in a.outcomes.iter().zip(&b.outcomes) {
        assert_eq!(x.warnings, y.warnings);
        assert_eq!(x.passes, y.passes);
        assert_eq!(x.master_updates, y.master_updates);
        assert_eq!(x.slave_updates, y.slave_updates);
    }
}

#[test]
fn csv_from_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wp.csv");
    std::fs::write(
        &path,
        "Wordpress ID,Username,Edited in Wordpress\n9,zed,2016-01-02T03:04:05\n",
    )
    .unwrap();

    let config = SyncConfig::from_toml(&fixture_config()).unwrap();
    let csv_data = std::fs::read_to_string(&path).unwrap();
    let records = load_csv_records(Side::Slave, &csv_data, config.source(Side::Slave)).unwrap();
    assert_eq!(records[0].index, "9");
    assert_eq!(
        records[0].slave_mod_time.unwrap().to_string(),
        "2016-01-02 03:04:05"
    );
}
