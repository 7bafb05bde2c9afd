//! File sinks for measurement records.

use std::convert::TryFrom;
use std::path::Path;

use serde::Serialize;

use etb_common::output::{result_path, DataWriter, Result};

pub mod csv;
pub mod json;

pub use self::csv::CsvDataWriter;
pub use self::json::JsonLinesDataWriter;

/// On-disk record format.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Format {
    Csv,
    JsonLines,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::JsonLines => "jsonl",
        }
    }
}

impl TryFrom<&str> for Format {
    type Error = String;

    fn try_from(name: &str) -> std::result::Result<Format, String> {
        match name {
            "csv" => Ok(Format::Csv),
            "json" | "jsonl" => Ok(Format::JsonLines),
            _ => Err(format!("{} is not an output format", name)),
        }
    }
}

/// Create a timestamped result file under `dir` and a writer for it.
pub fn create<T: Serialize + 'static>(dir: &Path, stem: &str, format: Format)
    -> Result<Box<dyn DataWriter<T>>>
{
    let path = result_path(dir, stem, format.extension())?;
    log::info!("Writing results to {}.", path.display());
    Ok(match format {
        Format::Csv => Box::new(CsvDataWriter::create(&path)?),
        Format::JsonLines => Box::new(JsonLinesDataWriter::create(&path)?),
    })
}
