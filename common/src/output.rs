//! Result output.

use std::error::Error as StdError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

/// Timestamp prefix of result files.
pub const FILE_TIMESTAMP: &str = "%Y-%m-%d_%H-%M-%S";

pub type Result<T> = std::result::Result<T, OutputError>;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write results")]
    Io(#[from] io::Error),
    #[error("failed to encode record")]
    Encode(#[source] Box<dyn StdError + Send + Sync>),
}

/// Sink for measurement records.
pub trait DataWriter<T: Serialize> {
    /// Append one record.
    fn save(&mut self, record: &T) -> Result<()>;

    /// Flush everything written so far.
    fn finish(&mut self) -> Result<()>;
}

/// Name of a result file created at `time`.
pub fn result_file_name(time: &DateTime<Local>, stem: &str, extension: &str) -> String {
    format!("{}-{}.{}", time.format(FILE_TIMESTAMP), stem, extension)
}

/// Fresh result path under `dir`, creating the directory if needed.
pub fn result_path(dir: &Path, stem: &str, extension: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    Ok(dir.join(result_file_name(&Local::now(), stem, extension)))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    pub fn file_name_layout() {
        let time = Local.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(result_file_name(&time, "sweep", "csv"), "2021-03-04_05-06-07-sweep.csv");
    }

    #[test]
    pub fn directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("results").join("today");

        let path = result_path(&nested, "monitor", "jsonl").unwrap();
        assert!(nested.is_dir());
        assert_eq!(path.parent(), Some(nested.as_path()));
        assert!(path.to_string_lossy().ends_with("-monitor.jsonl"));
    }
}
