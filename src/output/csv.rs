use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use etb_common::output::{DataWriter, OutputError, Result};

/// Comma separated records with a header row taken from the field names.
pub struct CsvDataWriter<W: Write> {
    writer: ::csv::Writer<W>,
}

impl CsvDataWriter<File> {
    pub fn create(path: &Path) -> Result<CsvDataWriter<File>> {
        Ok(CsvDataWriter::new(File::create(path)?))
    }
}

impl<W: Write> CsvDataWriter<W> {
    pub fn new(sink: W) -> CsvDataWriter<W> {
        CsvDataWriter {
            writer: ::csv::Writer::from_writer(sink),
        }
    }

    /// Flush and hand back the sink.
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner()
            .map_err(|e| OutputError::Io(e.into_error()))
    }
}

impl<T: Serialize, W: Write> DataWriter<T> for CsvDataWriter<W> {
    fn save(&mut self, record: &T) -> Result<()> {
        self.writer.serialize(record)
            .map_err(|e| OutputError::Encode(Box::new(e)))
    }

    fn finish(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use etb_common::data::SweepRow;

    #[test]
    pub fn header_from_field_names() {
        let mut writer = CsvDataWriter::new(Vec::new());
        writer.save(&SweepRow::step(240, 3.3, 10.0, 33.0)).unwrap();
        writer.save(&SweepRow::step(239, 3.29, 9.5, 31.255)).unwrap();
        DataWriter::<SweepRow>::finish(&mut writer).unwrap();

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "dec,volt [V],current [mA],power [mW]\n\
                          240,3.3,10.0,33.0\n\
                          239,3.29,9.5,31.255\n");
    }
}
