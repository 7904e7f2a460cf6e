use ephemera_reconciler::Change;

/// Render a reconciliation report's changes as human-readable text.
pub fn render_changes(changes: &[Change]) -> String {
    if changes.is_empty() {
        return "No changes.\n".to_string();
    }
    let mut out = String::new();
    for change in changes {
        let line = match change {
            Change::MarkedFailedStuckProvisioning { environment_id } => format!("~ {environment_id} marked FAILED (stuck provisioning)"),
            Change::MarkedDestroyedStuckDestroying { environment_id } => format!("~ {environment_id} marked DESTROYED (stuck destroying)"),
            Change::MarkedFailedDrift { environment_id } => format!("~ {environment_id} marked FAILED (namespace drift)"),
            Change::PurgedDestroyed { environment_id } => format!("- {environment_id} purged"),
            Change::RetriedFailed { environment_id } => format!("+ {environment_id} retried, back to PROVISIONING"),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}
