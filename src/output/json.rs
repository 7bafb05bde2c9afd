use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use etb_common::output::{DataWriter, OutputError, Result};

/// One JSON object per line.
pub struct JsonLinesDataWriter<W: Write> {
    sink: BufWriter<W>,
}

impl JsonLinesDataWriter<File> {
    pub fn create(path: &Path) -> Result<JsonLinesDataWriter<File>> {
        Ok(JsonLinesDataWriter::new(File::create(path)?))
    }
}

impl<W: Write> JsonLinesDataWriter<W> {
    pub fn new(sink: W) -> JsonLinesDataWriter<W> {
        JsonLinesDataWriter {
            sink: BufWriter::new(sink),
        }
    }

    /// Flush and hand back the sink.
    pub fn into_inner(self) -> Result<W> {
        self.sink.into_inner()
            .map_err(|e| OutputError::Io(e.into_error()))
    }
}

impl<T: Serialize, W: Write> DataWriter<T> for JsonLinesDataWriter<W> {
    fn save(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.sink, record)
            .map_err(|e| OutputError::Encode(Box::new(e)))?;
        self.sink.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(self.sink.flush()?)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use etb_common::data::{Quantity, Reading};

    #[test]
    pub fn one_object_per_line() {
        let time = Local.with_ymd_and_hms(2021, 4, 30, 12, 0, 0).unwrap();
        let mut writer = JsonLinesDataWriter::new(Vec::new());
        writer.save(&Reading::new(time, "vsm1", Quantity::Voltage, 3.3)).unwrap();
        writer.save(&Reading::new(time, "aux2", Quantity::Current, -0.5)).unwrap();
        DataWriter::<Reading>::finish(&mut writer).unwrap();

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<serde_json::Value> = text.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["channel"], "vsm1");
        assert_eq!(lines[0]["quantity"], "voltage");
        assert_eq!(lines[0]["unit"], "V");
        assert_eq!(lines[1]["value"], -0.5);
    }
}
