use crate::error;

/// Creates the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir_exist<P: AsRef<std::path::Path>>(path: P) -> error::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Writes a CSV file through a temporary sibling and renames it into place on success.
///
/// If `write` fails, the temporary file is removed and `path` is left untouched,
/// so a reader never observes a half-written export.
///
/// # Arguments
/// * `path` - Final location of the CSV file.
/// * `write` - Fills the writer. No header is emitted implicitly.
///
/// # Returns
/// * `error::Result<()>` - Success or the first I/O / CSV / Gateway error raised by `write`.
pub fn write_csv_atomic<P, F>(path: P, write: F) -> error::Result<()>
where
    P: AsRef<std::path::Path>,
    F: FnOnce(&mut csv::Writer<&mut tempfile::NamedTempFile>) -> error::Result<()>,
{
    let path = path.as_ref();
    ensure_parent_dir_exist(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut tmp);
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Writes `header` followed by one serialized record per row.
pub fn write_rows<P, T>(path: P, header: &[&str], rows: &[T]) -> error::Result<()>
where
    P: AsRef<std::path::Path>,
    T: serde::Serialize,
{
    write_csv_atomic(path, |writer| {
        writer.write_record(header)?;
        for row in rows {
            writer.serialize(row)?;
        }
        Ok(())
    })
}

/// Textual cell for a JSON value: null is empty, strings are verbatim,
/// everything else is its JSON text.
pub fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
