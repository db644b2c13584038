use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::config::{MatchPass, MatchingConfig, SourceConfig, SyncConfig};
use crate::duplicates::Duplicates;
use crate::error::ReconError;
use crate::matcher::{run_matcher, CardMatcher, EmailMatcher, Matcher, UsernameMatcher};
use crate::model::{Match, MatchList};
use crate::record::{parse_timestamp, Record, Side};
use crate::report::{Anomalies, DuplicateMatch, MatchOutcome, SyncInput, SyncMeta, SyncReport};
use crate::summary::compute_summary;
use crate::sync::SyncUpdate;

/// Everything the matcher chain found.
#[derive(Debug, Clone, Default)]
pub struct ChainResult {
    /// Pure matches of every pass, indexed by record index.
    pub global: MatchList,
    /// Pass that produced each match of `global`, in the same order.
    pub origins: Vec<MatchPass>,
    pub anomalies: Anomalies,
}

/// Run sync per config. Returns per-match outcomes, anomalies and summary.
pub fn run(config: &SyncConfig, input: &SyncInput) -> Result<SyncReport, ReconError> {
    let chain = run_matcher_chain(&config.matching, &input.master, &input.slave)?;
    let settings = Arc::new(config.settings());

    let mut outcomes = Vec::with_capacity(chain.global.len());
    for (m, pass) in chain.global.iter().zip(&chain.origins) {
        let (Some(master), Some(slave)) = (m.master(), m.slave()) else {
            continue;
        };
        let mut update = SyncUpdate::new(settings.clone(), master.clone(), slave.clone());
        update.update(&config.columns)?;
        outcomes.push(MatchOutcome::from_update(*pass, &update, &config.columns)?);
    }

    let summary = compute_summary(
        input.master.len(),
        input.slave.len(),
        &outcomes,
        &chain.anomalies,
    );
    log::info!(
        "{}: {} pure, {} updated, {} problematic, {} masterless, {} slaveless, {} duplicate",
        config.name,
        summary.pure,
        summary.updated,
        summary.problematic,
        summary.masterless,
        summary.slaveless,
        summary.duplicate,
    );

    Ok(SyncReport {
        meta: SyncMeta {
            config_name: config.name.clone(),
            mode: config.mode,
            master_name: config.master_name.clone(),
            slave_name: config.slave_name.clone(),
            passes: config.matching.passes.clone(),
            last_sync: config.last_sync,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        outcomes,
        anomalies: chain.anomalies,
    })
}

// ---------------------------------------------------------------------------
// Matcher chain
// ---------------------------------------------------------------------------

fn matcher_for(pass: MatchPass, config: &MatchingConfig, claimed: &MatchList) -> Box<dyn Matcher> {
    match pass {
        MatchPass::Username => {
            let mut matcher = UsernameMatcher::with_column(&config.username);
            if !claimed.is_empty() {
                matcher.exclude_matched(claimed);
            }
            Box::new(matcher)
        }
        MatchPass::Card => Box::new(CardMatcher::new(&config.card, claimed)),
        MatchPass::Email => Box::new(EmailMatcher::new(&config.email, claimed)),
    }
}

/// Split off records whose index is blank or repeats an earlier record's.
/// Claims are tracked by index, so only the first record of an index is matched.
fn split_unindexed(side: Side, records: &[Record]) -> (Vec<Record>, Vec<Record>) {
    let mut seen = HashSet::new();
    let (mut indexed, mut unindexed) = (Vec::new(), Vec::new());
    for record in records {
        let index = record.index().trim();
        if index.is_empty() || !seen.insert(index) {
            unindexed.push(record.clone());
        } else {
            indexed.push(record.clone());
        }
    }
    if !unindexed.is_empty() {
        log::warn!(
            "{} {side} records have a blank or repeated index and are not matched",
            unindexed.len()
        );
    }
    (indexed, unindexed)
}

/// Run the configured passes in order. Each pass only sees records no
/// earlier pass paired; whatever is left at the end becomes an anomaly.
pub fn run_matcher_chain(
    config: &MatchingConfig,
    masters: &[Record],
    slaves: &[Record],
) -> Result<ChainResult, ReconError> {
    let (masters, master_unindexed) = split_unindexed(Side::Master, masters);
    let (slaves, slave_unindexed) = split_unindexed(Side::Slave, slaves);
    let (masters, slaves) = (masters.as_slice(), slaves.as_slice());

    let mut global = MatchList::new();
    let mut origins = Vec::new();
    let mut duplicates: Vec<DuplicateMatch> = Vec::new();
    let mut master_duplicates = Duplicates::new();
    let mut slave_duplicates = Duplicates::new();

    for &pass in &config.passes {
        let mut matcher = matcher_for(pass, config, &global);
        run_matcher(matcher.as_mut(), masters, slaves)?;

        let key_fn = matcher.key_fn();
        let buckets = matcher.buckets();
        for m in &buckets.pure {
            global.add(m.clone())?;
            origins.push(pass);
        }
        for m in &buckets.duplicate {
            let key = m
                .master_records
                .iter()
                .chain(&m.slave_records)
                .next()
                .map(|r| key_fn(r))
                .unwrap_or_default();
            let reason = format!("{pass} '{key}'");
            if m.master_records.len() > 1 {
                master_duplicates.add_conflictors(&m.master_records, &reason, pass.duplicate_weighting());
            }
            if m.slave_records.len() > 1 {
                slave_duplicates.add_conflictors(&m.slave_records, &reason, pass.duplicate_weighting());
            }
            duplicates.push(DuplicateMatch {
                pass,
                key,
                records: m.clone(),
            });
        }
        log::info!(
            "{pass} pass: {} pure, {} duplicate, {} matched so far",
            buckets.pure.len(),
            buckets.duplicate.len(),
            global.len(),
        );
    }

    // A duplicate is resolved once a later pass claims any of its records;
    // its remaining members are then ordinary leftovers.
    let unresolved = |m: &Match| {
        m.master_records
            .iter()
            .all(|r| !global.contains_index(Side::Master, r.index()))
            && m.slave_records
                .iter()
                .all(|r| !global.contains_index(Side::Slave, r.index()))
    };
    duplicates.retain(|d| unresolved(&d.records));

    let mut in_duplicates: [HashSet<&str>; 2] = [HashSet::new(), HashSet::new()];
    for d in &duplicates {
        in_duplicates[0].extend(d.records.master_records.iter().map(Record::index));
        in_duplicates[1].extend(d.records.slave_records.iter().map(Record::index));
    }
    let leftover = |records: &[Record], side: Side, skip: &HashSet<&str>| -> Vec<Record> {
        records
            .iter()
            .filter(|r| !global.contains_index(side, r.index()) && !skip.contains(r.index()))
            .cloned()
            .collect()
    };
    let slaveless = leftover(masters, Side::Master, &in_duplicates[0]);
    let masterless = leftover(slaves, Side::Slave, &in_duplicates[1]);

    if !duplicates.is_empty() {
        log::warn!("{} duplicate matches left unresolved", duplicates.len());
    }

    let anomalies = Anomalies {
        masterless,
        slaveless,
        duplicates,
        master_duplicates,
        slave_duplicates,
        master_unindexed,
        slave_unindexed,
    };

    Ok(ChainResult {
        global,
        origins,
        anomalies,
    })
}

// ---------------------------------------------------------------------------
// CSV loading
// ---------------------------------------------------------------------------

fn parse_time(
    side: Side,
    record: &str,
    value: &str,
    format: Option<&str>,
) -> Result<Option<NaiveDateTime>, ReconError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    let parsed = match format {
        Some(format) => NaiveDateTime::parse_from_str(value.trim(), format).ok(),
        None => parse_timestamp(value),
    };
    parsed.map(Some).ok_or_else(|| ReconError::TimeParse {
        side,
        record: record.into(),
        value: value.into(),
    })
}

/// Load CSV rows of one source into records, keeping every column.
pub fn load_csv_records(
    side: Side,
    csv_data: &str,
    source: &SourceConfig,
) -> Result<Vec<Record>, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Io(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let idx = |name: &str| -> Result<usize, ReconError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ReconError::MissingColumn {
                side,
                column: name.into(),
            })
    };

    let index_idx = idx(&source.index)?;
    let mod_time_idx = source.mod_time.as_deref().map(idx).transpose()?;
    let transaction_idx = source.transaction_time.as_deref().map(idx).transpose()?;
    let format = source.time_format.as_deref();

    let mut records = Vec::new();

    for (row, result) in reader.records().enumerate() {
        let row_data = result.map_err(|e| ReconError::Io(e.to_string()))?;
        let index = row_data.get(index_idx).unwrap_or("").trim().to_string();

        let mut record = Record::new(index.clone(), row + 1);
        for (i, header) in headers.iter().enumerate() {
            record.set(header.clone(), row_data.get(i).unwrap_or(""));
        }

        if let Some(i) = mod_time_idx {
            if let Some(time) = parse_time(side, &index, row_data.get(i).unwrap_or(""), format)? {
                record = record.with_mod_time(side, time);
            }
        }
        if let Some(i) = transaction_idx {
            if let Some(time) = parse_time(side, &index, row_data.get(i).unwrap_or(""), format)? {
                record = record.with_transaction_time(time);
            }
        }

        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnPolicy, SyncMode};
    use crate::matcher::{CARD_COLUMN, EMAIL_COLUMN, USERNAME_COLUMN};
    use crate::model::MatchType;

    fn source(index: &str, mod_time: Option<&str>) -> SourceConfig {
        SourceConfig {
            file: "unused.csv".into(),
            index: index.into(),
            mod_time: mod_time.map(String::from),
            transaction_time: None,
            time_format: None,
        }
    }

    fn person(index: &str, username: &str, card: &str, email: &str) -> Record {
        Record::new(index, 1)
            .with(USERNAME_COLUMN, username)
            .with(CARD_COLUMN, card)
            .with(EMAIL_COLUMN, email)
    }

    #[test]
    fn chain_claims_in_priority_order() {
        let masters = vec![
            person("C1", "abe", "", ""),
            person("C2", "", "K2", ""),
            person("C3", "", "", "Cat@Example.com"),
            person("C4", "", "", ""),
        ];
        let slaves = vec![
            person("1", "abe", "K1", ""),
            person("2", "", "K2", ""),
            person("3", "", "", "cat@example.com "),
            person("4", "dan", "", ""),
        ];
        let chain = run_matcher_chain(&MatchingConfig::default(), &masters, &slaves).unwrap();

        assert_eq!(chain.global.len(), 3);
        assert_eq!(
            chain.origins,
            vec![MatchPass::Username, MatchPass::Card, MatchPass::Email]
        );
        assert!(chain.global.iter().all(|m| m.match_type() == MatchType::Pure));
        assert_eq!(chain.anomalies.slaveless.len(), 1);
        assert_eq!(chain.anomalies.slaveless[0].index, "C4");
        assert_eq!(chain.anomalies.masterless.len(), 1);
        assert_eq!(chain.anomalies.masterless[0].index, "4");
    }

    #[test]
    fn later_pass_never_reclaims() {
        // The username pass pairs C1 with 1; the card pass would pair C1 with 2.
        let masters = vec![person("C1", "abe", "K1", "")];
        let slaves = vec![person("1", "abe", "", ""), person("2", "", "K1", "")];
        let chain = run_matcher_chain(&MatchingConfig::default(), &masters, &slaves).unwrap();

        assert_eq!(chain.global.len(), 1);
        assert_eq!(chain.global.matches()[0].slave().unwrap().index, "1");
        assert_eq!(chain.anomalies.masterless[0].index, "2");
    }

    #[test]
    fn duplicate_resolved_by_later_pass() {
        let masters = vec![person("C1", "abe", "K1", "")];
        let slaves = vec![person("1", "abe", "K1", ""), person("2", "abe", "", "")];
        let chain = run_matcher_chain(&MatchingConfig::default(), &masters, &slaves).unwrap();

        assert_eq!(chain.origins, vec![MatchPass::Card]);
        assert!(chain.anomalies.duplicates.is_empty());
        assert_eq!(chain.anomalies.masterless[0].index, "2");
        assert_eq!(chain.anomalies.slave_duplicates.len(), 2);
        assert!(chain.anomalies.master_duplicates.is_empty());
    }

    #[test]
    fn unresolved_duplicate_is_reported_once() {
        let masters = vec![person("C1", "abe", "", ""), person("C2", "abe", "", "")];
        let slaves = vec![person("1", "abe", "", "")];
        let chain = run_matcher_chain(&MatchingConfig::default(), &masters, &slaves).unwrap();

        assert!(chain.global.is_empty());
        assert_eq!(chain.anomalies.duplicates.len(), 1);
        assert_eq!(chain.anomalies.duplicates[0].key, "abe");
        assert!(chain.anomalies.slaveless.is_empty());
        assert!(chain.anomalies.masterless.is_empty());
        let c1 = chain.anomalies.master_duplicates.get("C1").unwrap();
        assert_eq!(c1.reasons["username 'abe'"].details, "conflicts with C2");
    }

    #[test]
    fn blank_indices_never_abort_the_chain() {
        let masters = vec![person("", "abe", "", ""), person("", "bob", "", "")];
        let slaves = vec![person("1", "abe", "", ""), person("2", "bob", "", "")];
        let chain = run_matcher_chain(&MatchingConfig::default(), &masters, &slaves).unwrap();

        assert!(chain.global.is_empty());
        assert_eq!(chain.anomalies.master_unindexed.len(), 2);
        assert_eq!(chain.anomalies.masterless.len(), 2);
        assert!(chain.anomalies.slaveless.is_empty());
    }

    #[test]
    fn repeated_index_is_reported_not_lost() {
        let masters = vec![person("C1", "abe", "", ""), person("C1", "zed", "", "")];
        let slaves = vec![person("1", "abe", "", "")];
        let chain = run_matcher_chain(&MatchingConfig::default(), &masters, &slaves).unwrap();

        assert_eq!(chain.global.len(), 1);
        assert_eq!(chain.anomalies.master_unindexed.len(), 1);
        assert_eq!(chain.anomalies.master_unindexed[0].value(USERNAME_COLUMN), "zed");
        assert!(chain.anomalies.slaveless.is_empty());
        assert!(chain.anomalies.masterless.is_empty());
        assert!(!chain.anomalies.is_empty());
    }

    #[test]
    fn run_reports_unindexed_rows_from_csv() {
        let master_csv = "id,Username\n,abe\n,zed\nC3,cat\n";
        let slave_csv = "id,Username\n1,abe\n3,cat\n";
        let input = SyncInput {
            master: load_csv_records(Side::Master, master_csv, &source("id", None)).unwrap(),
            slave: load_csv_records(Side::Slave, slave_csv, &source("id", None)).unwrap(),
        };
        let config = SyncConfig {
            name: "test".into(),
            mode: SyncMode::Sync,
            master_name: "act".into(),
            slave_name: "wp".into(),
            last_sync: None,
            master: source("id", None),
            slave: source("id", None),
            matching: MatchingConfig::default(),
            columns: crate::config::ColumnPolicies::new(),
            output: Default::default(),
        };

        let report = run(&config, &input).unwrap();
        assert_eq!(report.summary.pure, 1);
        assert_eq!(report.summary.unindexed, 2);
        assert_eq!(report.summary.masterless, 1);
        assert!(report.has_findings());
    }

    #[test]
    fn run_syncs_pure_matches() {
        let masters = vec![person("C1", "abe", "", "")
            .with("First Name", "Derwent")
            .with_mod_time(Side::Master, parse_timestamp("2015-11-11 06:45:00").unwrap())];
        let slaves = vec![person("1", "abe", "", "")
            .with("First Name", "Abe")
            .with_mod_time(Side::Slave, parse_timestamp("2015-11-10 12:45:03").unwrap())];

        let mut columns = crate::config::ColumnPolicies::new();
        columns.insert("First Name".into(), ColumnPolicy::synced().warn());
        let config = SyncConfig {
            name: "test".into(),
            mode: SyncMode::Sync,
            master_name: "act".into(),
            slave_name: "wp".into(),
            last_sync: None,
            master: source("id", None),
            slave: source("id", None),
            matching: MatchingConfig::default(),
            columns,
            output: Default::default(),
        };

        let report = run(&config, &SyncInput { master: masters, slave: slaves }).unwrap();
        assert_eq!(report.summary.pure, 1);
        assert_eq!(report.summary.updated, 1);
        assert!(!report.has_findings());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.winner_name, "act");
        assert_eq!(outcome.slave_updates["First Name"], "Derwent");
        assert!(outcome.master_updates.is_empty());
    }

    #[test]
    fn load_csv_with_times() {
        let csv = "\
id,Username,Edited
C1,abe,2015-11-11 06:45:00
C2,bob,
";
        let records = load_csv_records(Side::Master, csv, &source("id", Some("Edited"))).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, "C1");
        assert_eq!(records[0].rowcount, 1);
        assert_eq!(records[0].value("Username"), "abe");
        assert!(records[0].master_mod_time.is_some());
        assert!(records[1].master_mod_time.is_none());
    }

    #[test]
    fn load_csv_custom_time_format() {
        let csv = "id,Edited\n7,11/11/2015 06:45\n";
        let mut src = source("id", Some("Edited"));
        src.time_format = Some("%m/%d/%Y %H:%M".into());
        let records = load_csv_records(Side::Slave, csv, &src).unwrap();
        assert_eq!(
            records[0].slave_mod_time.unwrap().to_string(),
            "2015-11-11 06:45:00"
        );
    }

    #[test]
    fn load_csv_missing_index_column() {
        let err = load_csv_records(Side::Slave, "name\nabe\n", &source("id", None)).unwrap_err();
        assert!(matches!(err, ReconError::MissingColumn { side: Side::Slave, .. }));
    }

    #[test]
    fn load_csv_bad_time() {
        let csv = "id,Edited\nC1,yesterday\n";
        let err = load_csv_records(Side::Master, csv, &source("id", Some("Edited"))).unwrap_err();
        assert!(matches!(err, ReconError::TimeParse { ref record, .. } if record == "C1"));
    }
}
