//! Export command - dumps a project's invocation log as training CSV.

use std::path::Path;

use anyhow::Result;
use database::{LogStore, write_records_csv};
use tracing::{info, warn};

/// Runs the export command, returning the number of records written.
///
/// # Errors
///
/// Returns an error if the store cannot be queried or the file cannot be written.
pub async fn run<S: LogStore>(logs: &S, project_id: &str, output: &Path) -> Result<usize> {
    info!(project_id, output = %output.display(), "Exporting invocation records");

    let records = logs.project_invocations(project_id).await?;
    if records.is_empty() {
        warn!(project_id, "Project has no stored invocations");
    }

    write_records_csv(output, &records)?;
    Ok(records.len())
}
