use super::InventoryError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::Write;

/// Destination for report rows.
///
/// Only one task ever writes to a sink.
pub trait RowSink: Send + 'static {
    fn write_row(&mut self, row: &[String]) -> Result<(), InventoryError>;

    /// Flush buffered rows.
    fn finish(&mut self) -> Result<(), InventoryError>;
}

/// Writes RFC 4180 CSV.
pub struct CsvSink<W: Write = File> {
    writer: csv::Writer<W>,
    path: Option<Utf8PathBuf>,
}

impl<W: Write> core::fmt::Debug for CsvSink<W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CsvSink").field("path", &self.path).finish_non_exhaustive()
    }
}

impl CsvSink<File> {
    /// Create (or truncate) the file at `path`, creating parent directories as needed.
    pub fn create(path: &Utf8Path) -> Result<Self, InventoryError> {
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| InventoryError::from(e).context(format!("could not create directory '{parent}'")))?;
        }

        let file = File::create(path).map_err(|e| InventoryError::from(e).context(format!("could not create '{path}'")))?;

        Ok(Self {
            writer: csv::Writer::from_writer(file),
            path: Some(path.to_owned()),
        })
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            path: None,
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, InventoryError> {
        self.writer
            .into_inner()
            .map_err(|e| InventoryError::io("could not flush CSV output").with_source(e.into_error()))
    }
}

impl<W: Write + Send + 'static> RowSink for CsvSink<W> {
    fn write_row(&mut self, row: &[String]) -> Result<(), InventoryError> {
        self.writer.write_record(row).map_err(InventoryError::from)
    }

    fn finish(&mut self) -> Result<(), InventoryError> {
        self.writer.flush().map_err(InventoryError::from)
    }
}
