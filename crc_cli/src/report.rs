//! Export report: a JSON summary plus the fitted series as CSV.

use chrono::{DateTime, Local};
use crc_core::{ExportSignal, FitReport};
use eyre::{Result, WrapErr};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct ExportReport<'a> {
    pub batch: &'a str,
    pub user: &'a str,
    pub created: String,
    pub signal: &'a ExportSignal,
    pub report: &'a FitReport,
}

#[derive(Debug, Serialize)]
struct SeriesRow {
    timestamp: i64,
    activity: f64,
    fitted: Option<f64>,
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(tmp, path)
}

/// `{dir}/{batch}-{user}-{YYYYmmdd_HHMMSS}` without extension.
pub fn export_stem(dir: &Path, batch: &str, user: &str, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("{batch}-{user}-{}", now.format("%Y%m%d_%H%M%S")))
}

pub fn series_csv(report: &FitReport) -> Result<Vec<u8>> {
    let mut w = csv::Writer::from_writer(Vec::new());
    for s in &report.samples {
        w.serialize(SeriesRow {
            timestamp: s.timestamp,
            activity: s.activity,
            fitted: report.fit().map(|r| r.activity_at(s.timestamp)),
        })?;
    }
    w.into_inner().map_err(|e| eyre::eyre!("flush series csv: {e}"))
}

/// Write `<stem>.json` and `<stem>.csv`; returns the JSON path.
pub fn write_export(
    dir: &Path,
    batch: &str,
    user: &str,
    signal: &ExportSignal,
    report: &FitReport,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("create export dir {}", dir.display()))?;
    let stem = export_stem(dir, batch, user, now);
    let json_path = stem.with_extension("json");
    let doc = ExportReport {
        batch,
        user,
        created: now.to_rfc3339(),
        signal,
        report,
    };
    let body = serde_json::to_vec_pretty(&doc)?;
    write_atomic(&json_path, &body)
        .wrap_err_with(|| format!("write export {}", json_path.display()))?;

    let csv_path = stem.with_extension("csv");
    write_atomic(&csv_path, &series_csv(report)?)
        .wrap_err_with(|| format!("write export {}", csv_path.display()))?;

    tracing::info!(path = %json_path.display(), "export written");
    Ok(json_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crc_core::{FitEngine, Isotope, Sample, Unit};

    fn report() -> FitReport {
        let samples: Vec<Sample> = (0..10i64)
            .map(|i| Sample {
                timestamp: 1_000 + i * 60,
                activity: 100.0 * 0.5f64.powf(i as f64 / 20.0),
            })
            .collect();
        FitReport {
            isotope: Isotope::C11,
            unit: Unit::MBq,
            reference_half_life: 20.4,
            tolerance: 0.05,
            outcome: FitEngine::default().evaluate(&samples, None, 20.4),
            samples,
        }
    }

    fn signal() -> ExportSignal {
        ExportSignal {
            isotope: Isotope::C11,
            half_life_min: 20.4,
            threshold: 0.25,
            span_secs: 540,
            newest_timestamp: 1_540,
        }
    }

    #[test]
    fn stem_has_batch_user_and_timestamp() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let stem = export_stem(Path::new("out"), "B7", "kim", now);
        assert_eq!(stem, Path::new("out").join("B7-kim-20240309_070501"));
    }

    #[test]
    fn export_writes_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let path = write_export(dir.path(), "B7", "kim", &signal(), &report(), now).unwrap();

        let v: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["batch"], "B7");
        assert_eq!(v["signal"]["span_secs"], 540);
        assert_eq!(v["report"]["outcome"]["status"], "fitted");

        let csv = std::fs::read_to_string(path.with_extension("csv")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("timestamp,activity,fitted"));
        assert_eq!(lines.count(), 10);
    }
}
