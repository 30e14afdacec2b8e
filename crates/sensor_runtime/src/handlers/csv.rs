//! CsvLogHandler - one CSV file per sensor

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use contracts::{ContractError, DataHandler, SampleValue, SensorInfo};
use tracing::{debug, instrument};

const LINE_END: &str = "\r\n";

/// Writes each sample as one comma-separated row.
///
/// The file is created on the first write and must not already exist.
/// `buffer_size` 0 or 1 writes and flushes every sample; `n` collects `n`
/// samples per write. Metadata rows are held until the file is created and
/// written first, with `#` prepended to their first field.
pub struct CsvLogHandler {
    name: String,
    path: PathBuf,
    buffer_size: usize,
    metadata: Vec<String>,
    buffer: Vec<String>,
    writer: Option<BufWriter<File>>,
}

impl CsvLogHandler {
    /// Handler writing under `directory`, file named after `info` and the current local time.
    pub fn new(directory: &Path, info: &SensorInfo, buffer_size: usize) -> Self {
        let path = directory.join(file_name(info, Local::now()));
        Self::with_path(path, buffer_size)
    }

    pub fn with_path(path: PathBuf, buffer_size: usize) -> Self {
        let name = format!("csv:{}", path.display());
        Self {
            name,
            path,
            buffer_size,
            metadata: Vec::new(),
            buffer: Vec::new(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, error: std::io::Error) -> ContractError {
        ContractError::handler_write(&self.name, error.to_string())
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, ContractError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .map_err(|e| self.io_error(e))?;
            debug!(path = %self.path.display(), "csv log created");
            self.writer = Some(BufWriter::new(file));
        }
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(ContractError::handler_write(&self.name, "file not open")),
        }
    }

    /// Write held metadata, buffered rows and `row`, then flush.
    fn write_out(&mut self, row: Option<String>) -> Result<(), ContractError> {
        // Rows stay held if the file cannot be opened yet.
        self.buffer.extend(row);
        self.writer()?;

        let mut pending = std::mem::take(&mut self.metadata);
        pending.append(&mut self.buffer);
        let writer = self.writer()?;
        let result = pending
            .iter()
            .try_for_each(|line| {
                writer.write_all(line.as_bytes())?;
                writer.write_all(LINE_END.as_bytes())
            })
            .and_then(|()| writer.flush());
        result.map_err(|e| self.io_error(e))
    }
}

impl DataHandler for CsvLogHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_metadata(&mut self, metadata: &[String]) -> Result<(), ContractError> {
        let Some((first, rest)) = metadata.split_first() else {
            return Err(ContractError::handler_write(
                &self.name,
                "metadata must contain at least one element",
            ));
        };
        let mut fields = vec![format!("#{first}")];
        fields.extend(rest.iter().cloned());
        self.metadata.push(format_row(fields.iter().map(String::as_str)));
        Ok(())
    }

    fn handle_data(&mut self, sample: &[SampleValue]) -> Result<(), ContractError> {
        let row = if sample.is_empty() {
            // A blank field makes a missing sample visible in the log.
            format_row([" "])
        } else {
            let fields: Vec<String> = sample.iter().map(ToString::to_string).collect();
            format_row(fields.iter().map(String::as_str))
        };

        if self.buffer_size > 1 && self.buffer.len() < self.buffer_size - 1 {
            self.buffer.push(row);
            return Ok(());
        }
        self.write_out(Some(row))
    }

    #[instrument(name = "csv_handler_terminate", skip(self), fields(path = %self.path.display()))]
    fn terminate(&mut self) -> Result<(), ContractError> {
        if self.writer.is_none() && self.buffer.is_empty() {
            // Never received data.
            return Ok(());
        }
        if !self.buffer.is_empty() || !self.metadata.is_empty() {
            self.write_out(None)?;
        }
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }
}

/// `{type}_{name}_{id}_{YYYYmmdd_HHMMSS}.csv`
pub fn file_name(info: &SensorInfo, at: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}_{}.csv",
        info.sensor_type,
        info.name,
        info.id,
        at.format("%Y%m%d_%H%M%S")
    )
}

/// Join fields with commas, quoting the ones that need it.
pub fn format_row<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    fields
        .into_iter()
        .map(quote_field)
        .collect::<Vec<_>>()
        .join(",")
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_file_name() {
        let info = SensorInfo::new("irt", "left", 3);
        let at = Local.with_ymd_and_hms(2024, 5, 17, 9, 3, 7).unwrap();
        assert_eq!(file_name(&info, at), "irt_left_3_20240517_090307.csv");
    }

    #[test]
    fn test_format_row_quoting() {
        assert_eq!(format_row(["a", "b,c", "say \"hi\""]), "a,\"b,c\",\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_unbuffered_writes_metadata_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut handler = CsvLogHandler::with_path(path.clone(), 0);

        handler
            .handle_metadata(&["time".into(), "value".into()])
            .unwrap();
        assert!(!path.exists());

        handler
            .handle_data(&[SampleValue::Float(1.5), SampleValue::Int(7)])
            .unwrap();
        assert_eq!(read(&path), "#time,value\r\n1.5,7\r\n");

        handler.handle_data(&[]).unwrap();
        handler.terminate().unwrap();
        assert_eq!(read(&path), "#time,value\r\n1.5,7\r\n \r\n");
    }

    #[test]
    fn test_buffered_rows_flush_in_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut handler = CsvLogHandler::with_path(path.clone(), 3);

        handler.handle_data(&["a".into()]).unwrap();
        handler.handle_data(&["b".into()]).unwrap();
        assert!(!path.exists());
        handler.handle_data(&["c".into()]).unwrap();
        assert_eq!(read(&path), "a\r\nb\r\nc\r\n");

        handler.handle_data(&["d".into()]).unwrap();
        handler.terminate().unwrap();
        assert_eq!(read(&path), "a\r\nb\r\nc\r\nd\r\n");
    }

    #[test]
    fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "keep").unwrap();

        let mut handler = CsvLogHandler::with_path(path.clone(), 0);
        assert!(handler.handle_data(&["x".into()]).is_err());
        assert_eq!(read(&path), "keep");
    }

    #[test]
    fn test_rows_survive_failed_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "keep").unwrap();

        let mut handler = CsvLogHandler::with_path(path.clone(), 0);
        handler.handle_metadata(&["time".into()]).unwrap();
        assert!(handler.handle_data(&["x".into()]).is_err());

        fs::remove_file(&path).unwrap();
        handler.handle_data(&["y".into()]).unwrap();
        handler.terminate().unwrap();
        assert_eq!(read(&path), "#time\r\nx\r\ny\r\n");
    }

    #[test]
    fn test_empty_metadata_rejected() {
        let mut handler = CsvLogHandler::with_path(PathBuf::from("unused.csv"), 0);
        assert!(handler.handle_metadata(&[]).is_err());
    }

    #[test]
    fn test_terminate_without_data_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut handler = CsvLogHandler::with_path(path.clone(), 0);
        handler.handle_metadata(&["time".into()]).unwrap();
        handler.terminate().unwrap();
        assert!(!path.exists());
    }
}
