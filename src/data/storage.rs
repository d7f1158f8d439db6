//! Record sinks.
//!
//! The aggregator pushes `(record, test_active, should_write)` to every sink
//! on every tick. A sink stores the record only when both flags are set and
//! applies no other filtering.

use super::record::FusedRecord;
use crate::error::{AppResult, DaqError};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Destination for output records.
pub trait RecordSink: Send {
    /// Offer one output record.
    fn accept(&mut self, record: &FusedRecord, test_active: bool, should_write: bool)
        -> AppResult<()>;

    /// Flush and release resources.
    fn shutdown(&mut self) -> AppResult<()> {
        Ok(())
    }
}

// =============================================================================
// CSV
// =============================================================================

/// Appends rows to a CSV file, writing the header when the file is empty.
#[cfg(feature = "storage_csv")]
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<std::fs::File>,
    rows: u64,
}

#[cfg(feature = "storage_csv")]
impl CsvSink {
    /// Open `path` for appending. The directory must exist.
    pub fn create(path: impl AsRef<Path>, pulse_names: &[String]) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            writer.write_record(FusedRecord::header(pulse_names))?;
            writer.flush()?;
        }
        info!(path = %path.display(), "CSV sink opened");
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written since opening.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

#[cfg(feature = "storage_csv")]
impl RecordSink for CsvSink {
    fn accept(
        &mut self,
        record: &FusedRecord,
        test_active: bool,
        should_write: bool,
    ) -> AppResult<()> {
        if !(test_active && should_write) {
            return Ok(());
        }
        self.writer.write_record(record.to_row())?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> AppResult<()> {
        self.writer.flush()?;
        info!(path = %self.path.display(), rows = self.rows, "CSV sink closed");
        Ok(())
    }
}

/// Stand-in when CSV support is compiled out.
#[cfg(not(feature = "storage_csv"))]
pub struct CsvSink;

#[cfg(not(feature = "storage_csv"))]
impl CsvSink {
    /// Always fails: CSV support is not compiled in.
    pub fn create(_path: impl AsRef<Path>, _pulse_names: &[String]) -> AppResult<Self> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(not(feature = "storage_csv"))]
impl RecordSink for CsvSink {
    fn accept(&mut self, _record: &FusedRecord, _test_active: bool, _should_write: bool) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

// =============================================================================
// Background writer
// =============================================================================

enum SinkMessage {
    Record {
        record: Box<FusedRecord>,
        test_active: bool,
        should_write: bool,
    },
    Shutdown,
}

/// Runs another sink on its own thread so file I/O stays off the tick loop.
pub struct ThreadedSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedSink {
    /// Move `inner` to a `sink-writer` thread.
    pub fn spawn(mut inner: Box<dyn RecordSink>) -> AppResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkMessage>();
        let worker = std::thread::Builder::new()
            .name("sink-writer".to_string())
            .spawn(move || {
                while let Some(message) = rx.blocking_recv() {
                    match message {
                        SinkMessage::Record {
                            record,
                            test_active,
                            should_write,
                        } => {
                            if let Err(err) = inner.accept(&record, test_active, should_write) {
                                error!(error = %err, "Writing record failed");
                            }
                        }
                        SinkMessage::Shutdown => break,
                    }
                }
                if let Err(err) = inner.shutdown() {
                    error!(error = %err, "Closing sink failed");
                }
            })
            .map_err(|e| DaqError::Worker(format!("failed to spawn sink writer: {}", e)))?;

        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }
}

impl RecordSink for ThreadedSink {
    fn accept(
        &mut self,
        record: &FusedRecord,
        test_active: bool,
        should_write: bool,
    ) -> AppResult<()> {
        self.tx
            .send(SinkMessage::Record {
                record: Box::new(record.clone()),
                test_active,
                should_write,
            })
            .map_err(|_| DaqError::Worker("sink writer has stopped".to_string()))
    }

    fn shutdown(&mut self) -> AppResult<()> {
        if self.tx.send(SinkMessage::Shutdown).is_err() {
            warn!("Sink writer already stopped");
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| DaqError::Worker("sink writer panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for ThreadedSink {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.shutdown() {
                error!(error = %err, "Stopping sink writer failed");
            }
        }
    }
}
