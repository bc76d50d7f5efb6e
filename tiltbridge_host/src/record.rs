use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use csv::{Writer, WriterBuilder};
use log::info;
use tiltbridge_common::{ImuSample, SAMPLE_FIELDS};

use crate::error::{BridgeError, Result};

/// `YYYYmmddHHMMSS.csv` for a session started at `at`.
pub fn session_file_name(at: DateTime<Local>) -> String {
    format!("{}.csv", at.format("%Y%m%d%H%M%S"))
}

/// CSV sink receiving one row per decoded frame.
#[derive(Debug)]
pub struct Recorder<W: Write> {
    writer: Writer<W>,
    path: PathBuf,
    rows: u64,
}

impl Recorder<File> {
    /// Start a new session file in `dir`, named after the current time.
    pub fn create_in(dir: &Path) -> Result<Self> {
        let path = dir.join(session_file_name(Local::now()));
        let writer = WriterBuilder::new()
            .from_path(&path)
            .map_err(|source| BridgeError::Recording {
                path: path.clone(),
                source,
            })?;
        info!("Recording to {:?}", path);
        Self::with_writer(writer, path)
    }
}

impl<W: Write> Recorder<W> {
    #[cfg(test)]
    pub fn from_writer(inner: W, label: impl Into<PathBuf>) -> Result<Self> {
        let writer = WriterBuilder::new().from_writer(inner);
        Self::with_writer(writer, label.into())
    }

    fn with_writer(mut writer: Writer<W>, path: PathBuf) -> Result<Self> {
        match writer.write_record(SAMPLE_FIELDS) {
            Ok(_) => Ok(Self {
                writer,
                path,
                rows: 0,
            }),
            Err(source) => Err(BridgeError::Recording { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn write(&mut self, sample: &ImuSample) -> Result<()> {
        let record = sample.sorted_values().map(|v| format!("{:?}", v));
        self.writer
            .write_record(&record)
            .map_err(|source| self.error(source))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush buffered rows and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        if let Err(e) = self.writer.flush() {
            return Err(self.error(e.into()));
        }
        info!("Recorded {} rows to {:?}", self.rows, self.path);
        let path = self.path;
        self.writer.into_inner().map_err(|e| {
            let io = std::io::Error::new(e.error().kind(), e.error().to_string());
            BridgeError::Recording {
                path,
                source: io.into(),
            }
        })
    }

    fn error(&self, source: csv::Error) -> BridgeError {
        BridgeError::Recording {
            path: self.path.clone(),
            source,
        }
    }
}
