//! Append-only CSV analytics file.
//!
//! Rows are buffered in memory and only reach the disk on [`CsvLogger::flush`]
//! to spare SD cards on small boards.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use super::TelemetryRecord;

const UNIT_COLUMNS: [&str; 5] = ["cmpfreq", "otemp", "htemp", "stemp", "shum"];

pub fn header(unit_count: usize) -> Vec<String> {
    let mut columns: Vec<String> = ["datetime", "pv_generation", "grid_import", "ac_consumption"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    for n in 0..unit_count {
        columns.extend(UNIT_COLUMNS.iter().map(|c| format!("aircon{n}_{c}")));
    }
    columns
}

fn field<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub struct CsvLogger<W: Write> {
    writer: csv::Writer<W>,
    unit_count: usize,
}

impl CsvLogger<File> {
    /// Appends to `path`; the header is only written when the file is new.
    pub fn open(path: &Path, unit_count: usize) -> io::Result<Self> {
        let is_new = std::fs::metadata(path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::from_writer(file, unit_count, is_new)
    }
}

impl<W: Write> CsvLogger<W> {
    pub fn from_writer(writer: W, unit_count: usize, write_header: bool) -> io::Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        if write_header {
            writer.write_record(header(unit_count))?;
        }
        Ok(Self { writer, unit_count })
    }

    pub fn append(&mut self, record: &TelemetryRecord) -> io::Result<()> {
        if record.aircons.len() != self.unit_count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "expected {} air conditioners, got {}",
                    self.unit_count,
                    record.aircons.len()
                ),
            ));
        }
        let mut row = vec![
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            field(record.pv_generation_w),
            field(record.grid_import_w),
            field(record.ac_consumption_w),
        ];
        for unit in &record.aircons {
            row.push(field(unit.cmpfreq));
            row.push(field(unit.otemp));
            row.push(field(unit.htemp));
            row.push(field(unit.stemp));
            row.push(field(unit.shum));
        }
        self.writer.write_record(&row)?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }
}
