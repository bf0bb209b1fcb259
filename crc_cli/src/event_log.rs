//! Per-day sample event log.
//!
//! One JSON record per line. Files are keyed on the local calendar date of
//! each record's timestamp, so a session running past local midnight
//! continues in the next day's file.

use chrono::{DateTime, Local, NaiveDate};
use crc_core::{Listener, SampleRecord};
use crc_traits::BoxError;
use eyre::{Result, WrapErr};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub struct EventLog {
    dir: PathBuf,
    stem: String,
    current: Option<(NaiveDate, File)>,
}

impl EventLog {
    /// Files are named `{batch}-{user}.{YYYY-MM-DD}.log` inside `dir`.
    pub fn open(dir: &Path, batch: &str, user: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .wrap_err_with(|| format!("create event log dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            stem: format!("{batch}-{user}"),
            current: None,
        })
    }

    fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.{}.log", self.stem, day.format("%Y-%m-%d")))
    }

    fn file_for(&mut self, day: NaiveDate) -> std::io::Result<&mut File> {
        if self.current.as_ref().is_none_or(|(d, _)| *d != day) {
            let path = self.path_for(day);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            tracing::info!(path = %path.display(), "event log file opened");
            self.current = Some((day, file));
        }
        match &mut self.current {
            Some((_, file)) => Ok(file),
            None => Err(std::io::Error::other("event log file not open")),
        }
    }
}

/// Local calendar date of an epoch-seconds timestamp.
fn local_day(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|t| t.with_timezone(&Local).date_naive())
}

impl Listener for EventLog {
    fn on_record(&mut self, record: &SampleRecord) -> Result<(), BoxError> {
        let day = local_day(record.timestamp)
            .ok_or_else(|| format!("timestamp {} out of range", record.timestamp))?;
        let line = record.to_log_line()?;
        let file = self.file_for(day)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

/// Read an event log back. Blank and malformed lines are skipped.
pub fn read_log(path: &Path) -> Result<Vec<SampleRecord>> {
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("open event log {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.wrap_err_with(|| format!("read event log {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match SampleRecord::from_log_line(&line) {
            Ok(rec) => records.push(rec),
            Err(e) => tracing::warn!(line = idx + 1, error = %e, "skipping malformed log line"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crc_core::{Isotope, Unit};

    fn rec(ts: i64) -> SampleRecord {
        SampleRecord {
            isotope: Isotope::F18,
            unit: Unit::MBq,
            activity: 250.0,
            timestamp: ts,
        }
    }

    #[test]
    fn written_records_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::open(dir.path(), "B1", "ana").unwrap();
        log.on_record(&rec(10)).unwrap();
        log.on_record(&rec(20)).unwrap();
        drop(log);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("B1-ana."), "{name}");
        assert!(name.ends_with(".log"), "{name}");

        let back = read_log(&files[0]).unwrap();
        assert_eq!(back, vec![rec(10), rec(20)]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        let good = rec(5).to_log_line().unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n\n{good}\n")).unwrap();
        assert_eq!(read_log(&path).unwrap().len(), 2);
    }

    #[test]
    fn new_local_day_starts_a_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = 1_700_000_000;
        // two days on, so a DST change cannot keep it on the same date
        let t1 = t0 + 2 * 86_400;
        let mut log = EventLog::open(dir.path(), "B1", "ana").unwrap();
        log.on_record(&rec(t0)).unwrap();
        log.on_record(&rec(t0 + 10)).unwrap();
        log.on_record(&rec(t1)).unwrap();
        drop(log);

        let name = |ts: i64| {
            let day = local_day(ts).unwrap();
            dir.path().join(format!("B1-ana.{}.log", day.format("%Y-%m-%d")))
        };
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
        assert_eq!(read_log(&name(t0)).unwrap(), vec![rec(t0), rec(t0 + 10)]);
        assert_eq!(read_log(&name(t1)).unwrap(), vec![rec(t1)]);
    }

    #[test]
    fn reopening_appends_to_the_day_file() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = 1_700_000_000;
        for ts in [t0, t0 + 30] {
            let mut log = EventLog::open(dir.path(), "B2", "bo").unwrap();
            log.on_record(&rec(ts)).unwrap();
        }
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(read_log(&files[0]).unwrap(), vec![rec(t0), rec(t0 + 30)]);
    }
}
