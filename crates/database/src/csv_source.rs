//! CSV training data, in the column layout of the invocation log export.

use std::io;
use std::path::Path;

use anyhow::Context;
use invocation_structs::InvocationRecord;
use tracing::info;

/// Reads invocation records from a CSV file with a header row.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a row does not match
/// [`InvocationRecord`].
pub fn read_records_csv(path: &Path) -> anyhow::Result<Vec<InvocationRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open training data {}", path.display()))?;
    let records =
        read_records(file).with_context(|| format!("Failed to parse {}", path.display()))?;

    info!(path = %path.display(), records = records.len(), "Loaded training data");
    Ok(records)
}

/// Reads invocation records from any CSV source.
///
/// # Errors
///
/// Returns an error if a row does not match [`InvocationRecord`].
pub fn read_records<R: io::Read>(reader: R) -> anyhow::Result<Vec<InvocationRecord>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();

    for (line, row) in reader.deserialize().enumerate() {
        let record: InvocationRecord = row.with_context(|| format!("Invalid record {}", line + 1))?;
        records.push(record);
    }

    Ok(records)
}

/// Writes invocation records to a CSV file, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_records_csv(path: &Path, records: &[InvocationRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_records(file, records)?;

    info!(path = %path.display(), records = records.len(), "Wrote training data");
    Ok(())
}

/// Writes invocation records as CSV with a header row.
///
/// # Errors
///
/// Returns an error if serialization or the underlying write fails.
pub fn write_records<W: io::Write>(writer: W, records: &[InvocationRecord]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
