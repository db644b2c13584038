use crate::report::{Anomalies, MatchOutcome, SyncSummary};

/// Compute summary statistics of one run.
pub fn compute_summary(
    master_records: usize,
    slave_records: usize,
    outcomes: &[MatchOutcome],
    anomalies: &Anomalies,
) -> SyncSummary {
    let mut summary = SyncSummary {
        master_records,
        slave_records,
        pure: outcomes.len(),
        masterless: anomalies.masterless.len(),
        slaveless: anomalies.slaveless.len(),
        duplicate: anomalies.duplicates.len(),
        unindexed: anomalies.master_unindexed.len() + anomalies.slave_unindexed.len(),
        ..SyncSummary::default()
    };

    for outcome in outcomes {
        *summary.matched_by.entry(outcome.pass).or_insert(0) += 1;
        if outcome.updates > 0 {
            summary.updated += 1;
        }
        summary.important_updates += outcome.important_updates;
        if outcome.needs_review {
            summary.problematic += 1;
        }
        summary.conflicts += outcome.conflict_count();
    }

    summary
}
