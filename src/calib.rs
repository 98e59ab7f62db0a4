//! Calibration store (`SPEC_FULL.md` §4.G.FULL), grounded on
//! `original_source/pandora/database/calib_db.py`'s
//! `PandoraCalibrationDatabase`.
//!
//! Each tag (e.g. `"throughput"`, `"nd_transmission"`) owns a subdirectory
//! of timestamped CSV artifacts plus one shared `calibration_log.csv`
//! indexing them, with at most one artifact per tag flagged `is_default`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{PandoraError, Result};

/// One calibration artifact: parallel wavelength/transmission columns plus
/// an optional per-point transmission error column, matching the shape the
/// original's `add_calibration` derives `rms`/`lambda0`/`lambdaEnd` from.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationArtifact {
    /// Wavelength axis, nm.
    pub wavelength_nm: Vec<f64>,
    /// Transmission fraction at each wavelength.
    pub transmission: Vec<f64>,
    /// Per-point transmission uncertainty, if measured.
    pub transmission_err: Option<Vec<f64>>,
}

/// One row of `calibration_log.csv` (`spec.md` §6 column list).
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationLogEntry {
    /// Calibration tag (e.g. `"throughput"`).
    pub tag: String,
    /// Artifact filename within `calib/<tag>/`.
    pub filename: String,
    /// ISO-8601 creation timestamp.
    pub timestamp: String,
    /// Minimum wavelength covered, nm.
    pub lambda0: f64,
    /// Maximum wavelength covered, nm.
    pub lambda_end: f64,
    /// Mean wavelength spacing, nm.
    pub lambda_width: f64,
    /// Mean of `transmission_err`, if the artifact carried one.
    pub rms: Option<f64>,
    /// Whether this is the tag's default artifact.
    pub is_default: bool,
}

const LOG_HEADER: &[&str] = &[
    "tag",
    "filename",
    "timestamp",
    "lambda0",
    "lambdaEnd",
    "lambdaWidth",
    "rms",
    "is_default",
];

fn entry_to_record(entry: &CalibrationLogEntry) -> Vec<String> {
    vec![
        entry.tag.clone(),
        entry.filename.clone(),
        entry.timestamp.clone(),
        entry.lambda0.to_string(),
        entry.lambda_end.to_string(),
        entry.lambda_width.to_string(),
        entry.rms.map(|v| v.to_string()).unwrap_or_default(),
        entry.is_default.to_string(),
    ]
}

fn record_to_entry(record: &csv::StringRecord) -> Result<CalibrationLogEntry> {
    let get = |idx: usize| -> &str { record.get(idx).unwrap_or("") };
    Ok(CalibrationLogEntry {
        tag: get(0).to_string(),
        filename: get(1).to_string(),
        timestamp: get(2).to_string(),
        lambda0: get(3).parse().unwrap_or(f64::NAN),
        lambda_end: get(4).parse().unwrap_or(f64::NAN),
        lambda_width: get(5).parse().unwrap_or(f64::NAN),
        rms: get(6).parse().ok(),
        is_default: get(7) == "true",
    })
}

/// The calibration store rooted at `<database root>/calib/`.
pub struct CalibrationStore {
    calib_path: PathBuf,
    log_file: PathBuf,
    entries: Vec<CalibrationLogEntry>,
}

impl CalibrationStore {
    /// Open the calibration store, creating `calib/` and its log if absent.
    pub fn open(database_root: &Path) -> Result<Self> {
        let calib_path = database_root.join("calib");
        std::fs::create_dir_all(&calib_path).map_err(PandoraError::from)?;
        let log_file = calib_path.join("calibration_log.csv");

        let entries = if log_file.exists() {
            load_log(&log_file)?
        } else {
            let file = File::create(&log_file).map_err(PandoraError::from)?;
            let mut writer = csv::Writer::from_writer(file);
            writer
                .write_record(LOG_HEADER)
                .map_err(|e| PandoraError::StateInvariant(format!("failed to seed calibration log: {e}")))?;
            writer
                .flush()
                .map_err(|e| PandoraError::StateInvariant(format!("failed to seed calibration log: {e}")))?;
            Vec::new()
        };

        Ok(Self {
            calib_path,
            log_file,
            entries,
        })
    }

    /// Save a new calibration artifact under `tag`, deriving and appending
    /// its log entry. The first artifact saved for a tag becomes its
    /// default; later ones must be promoted explicitly via
    /// [`CalibrationStore::set_default`].
    pub fn add_calibration(&mut self, tag: &str, data: &CalibrationArtifact, timestamp: &str) -> Result<String> {
        if data.wavelength_nm.len() != data.transmission.len() {
            return Err(PandoraError::StateInvariant(
                "calibration wavelength and transmission columns must be the same length".into(),
            ));
        }
        let tag_dir = self.calib_path.join(tag);
        std::fs::create_dir_all(&tag_dir).map_err(PandoraError::from)?;

        let filename = format!("{}.csv", timestamp.replace([':', '-'], "").replace('T', "_"));
        let artifact_path = tag_dir.join(&filename);
        write_artifact(&artifact_path, data)?;

        let lambda0 = data.wavelength_nm.iter().cloned().fold(f64::INFINITY, f64::min);
        let lambda_end = data.wavelength_nm.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let lambda_width = if data.wavelength_nm.len() < 2 {
            0.0
        } else {
            (lambda_end - lambda0) / (data.wavelength_nm.len() - 1) as f64
        };
        let rms = data
            .transmission_err
            .as_ref()
            .filter(|e| !e.is_empty())
            .map(|e| e.iter().sum::<f64>() / e.len() as f64);
        let is_default = !self.entries.iter().any(|e| e.tag == tag);

        self.entries.push(CalibrationLogEntry {
            tag: tag.to_string(),
            filename: filename.clone(),
            timestamp: timestamp.to_string(),
            lambda0,
            lambda_end,
            lambda_width,
            rms,
            is_default,
        });
        self.save_log()?;
        Ok(filename)
    }

    /// Mark `filename` (or, if `None`, the most recently added artifact) as
    /// `tag`'s default, demoting any previous default for that tag. A tag
    /// with no artifacts yet is a warning, not an error, matching the
    /// original's `set_default` on an empty tag.
    pub fn set_default(&mut self, tag: &str, filename: Option<&str>) -> Result<()> {
        let target_filename = match filename {
            Some(f) => {
                if !self.entries.iter().any(|e| e.tag == tag && e.filename == f) {
                    return Err(PandoraError::StateInvariant(format!(
                        "no calibration file '{f}' found for tag '{tag}'"
                    )));
                }
                f.to_string()
            }
            None => {
                let Some(latest) = self.most_recent_for_tag(tag) else {
                    tracing::warn!(tag, "set_default called on a tag with no calibrations; ignoring");
                    return Ok(());
                };
                latest.filename.clone()
            }
        };

        for entry in self.entries.iter_mut().filter(|e| e.tag == tag) {
            entry.is_default = entry.filename == target_filename;
        }
        self.save_log()
    }

    /// Read back `tag`'s most recently added calibration artifact. Returns
    /// `Ok(None)` if the tag has no calibrations (a warning, not an error).
    pub fn get_latest_calibration(&self, tag: &str) -> Result<Option<CalibrationArtifact>> {
        match self.most_recent_for_tag(tag) {
            Some(entry) => Ok(Some(self.read_artifact(tag, &entry.filename)?)),
            None => {
                tracing::warn!(tag, "no calibrations recorded for this tag");
                Ok(None)
            }
        }
    }

    /// Read back `tag`'s default artifact, falling back to the most recent
    /// one if no default has been set.
    pub fn get_default_calibration(&self, tag: &str) -> Result<Option<CalibrationArtifact>> {
        match self.entries.iter().find(|e| e.tag == tag && e.is_default) {
            Some(entry) => Ok(Some(self.read_artifact(tag, &entry.filename)?)),
            None => {
                tracing::warn!(tag, "no default calibration set; falling back to most recent");
                self.get_latest_calibration(tag)
            }
        }
    }

    /// Read back a specific artifact by filename, resolved against the
    /// whole log (not scoped to a caller-supplied tag), matching the
    /// original's global `get_calibration_file` lookup.
    pub fn get_calibration_file(&self, filename: &str) -> Result<CalibrationArtifact> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.filename == filename)
            .ok_or_else(|| PandoraError::StateInvariant(format!("no calibration log entry for file '{filename}'")))?;
        self.read_artifact(&entry.tag, filename)
    }

    /// List log entries, optionally filtered to one tag.
    pub fn list_calibrations(&self, tag: Option<&str>) -> Vec<&CalibrationLogEntry> {
        self.entries
            .iter()
            .filter(|e| match tag {
                Some(t) => e.tag == t,
                None => true,
            })
            .collect()
    }

    fn most_recent_for_tag(&self, tag: &str) -> Option<&CalibrationLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.tag == tag)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
    }

    fn read_artifact(&self, tag: &str, filename: &str) -> Result<CalibrationArtifact> {
        read_artifact(&self.calib_path.join(tag).join(filename))
    }

    fn save_log(&self) -> Result<()> {
        let file = File::create(&self.log_file).map_err(PandoraError::from)?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(LOG_HEADER)
            .map_err(|e| PandoraError::StateInvariant(format!("failed to write calibration log: {e}")))?;
        for entry in &self.entries {
            writer
                .write_record(entry_to_record(entry))
                .map_err(|e| PandoraError::StateInvariant(format!("failed to write calibration log: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| PandoraError::StateInvariant(format!("failed to flush calibration log: {e}")))
    }
}

fn load_log(path: &Path) -> Result<Vec<CalibrationLogEntry>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| PandoraError::StateInvariant(format!("failed to open calibration log: {e}")))?;
    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PandoraError::StateInvariant(format!("malformed calibration log row: {e}")))?;
        entries.push(record_to_entry(&record)?);
    }
    Ok(entries)
}

fn write_artifact(path: &Path, data: &CalibrationArtifact) -> Result<()> {
    let file = File::create(path).map_err(PandoraError::from)?;
    let mut writer = csv::Writer::from_writer(file);
    let mut header = vec!["wavelength".to_string(), "transmission".to_string()];
    if data.transmission_err.is_some() {
        header.push("transmission_err".to_string());
    }
    writer
        .write_record(&header)
        .map_err(|e| PandoraError::StateInvariant(format!("failed to write calibration artifact: {e}")))?;
    for i in 0..data.wavelength_nm.len() {
        let mut record = vec![data.wavelength_nm[i].to_string(), data.transmission[i].to_string()];
        if let Some(err) = &data.transmission_err {
            record.push(err[i].to_string());
        }
        writer
            .write_record(&record)
            .map_err(|e| PandoraError::StateInvariant(format!("failed to write calibration artifact: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| PandoraError::StateInvariant(format!("failed to flush calibration artifact: {e}")))
}

fn read_artifact(path: &Path) -> Result<CalibrationArtifact> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| PandoraError::StateInvariant(format!("failed to open calibration artifact: {e}")))?;
    let has_err_col = reader
        .headers()
        .map_err(|e| PandoraError::StateInvariant(format!("failed to read calibration artifact header: {e}")))?
        .iter()
        .any(|h| h == "transmission_err");

    let mut wavelength_nm = Vec::new();
    let mut transmission = Vec::new();
    let mut transmission_err = if has_err_col { Some(Vec::new()) } else { None };
    for record in reader.records() {
        let record = record.map_err(|e| PandoraError::StateInvariant(format!("malformed calibration artifact row: {e}")))?;
        wavelength_nm.push(record.get(0).unwrap_or("").parse().unwrap_or(f64::NAN));
        transmission.push(record.get(1).unwrap_or("").parse().unwrap_or(f64::NAN));
        if let Some(errs) = transmission_err.as_mut() {
            errs.push(record.get(2).unwrap_or("").parse().unwrap_or(f64::NAN));
        }
    }
    Ok(CalibrationArtifact {
        wavelength_nm,
        transmission,
        transmission_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifact() -> CalibrationArtifact {
        CalibrationArtifact {
            wavelength_nm: vec![400.0, 500.0, 600.0],
            transmission: vec![0.5, 0.6, 0.55],
            transmission_err: Some(vec![0.01, 0.02, 0.015]),
        }
    }

    #[test]
    fn first_calibration_for_a_tag_becomes_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CalibrationStore::open(dir.path()).unwrap();
        store
            .add_calibration("throughput", &sample_artifact(), "2026-01-01T00:00:00")
            .unwrap();
        let entries = store.list_calibrations(Some("throughput"));
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_default);
    }

    #[test]
    fn set_default_demotes_previous_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CalibrationStore::open(dir.path()).unwrap();
        let first = store
            .add_calibration("throughput", &sample_artifact(), "2026-01-01T00:00:00")
            .unwrap();
        let second = store
            .add_calibration("throughput", &sample_artifact(), "2026-01-02T00:00:00")
            .unwrap();
        store.set_default("throughput", Some(&first)).unwrap();
        let entries = store.list_calibrations(Some("throughput"));
        let first_entry = entries.iter().find(|e| e.filename == first).unwrap();
        let second_entry = entries.iter().find(|e| e.filename == second).unwrap();
        assert!(first_entry.is_default);
        assert!(!second_entry.is_default);
    }

    #[test]
    fn set_default_unknown_filename_for_known_tag_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CalibrationStore::open(dir.path()).unwrap();
        store
            .add_calibration("throughput", &sample_artifact(), "2026-01-01T00:00:00")
            .unwrap();
        assert!(matches!(
            store.set_default("throughput", Some("does_not_exist.csv")),
            Err(PandoraError::StateInvariant(_))
        ));
    }

    #[test]
    fn set_default_on_empty_tag_warns_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CalibrationStore::open(dir.path()).unwrap();
        assert!(store.set_default("nonexistent_tag", None).is_ok());
    }

    #[test]
    fn get_default_falls_back_to_latest_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CalibrationStore::open(dir.path()).unwrap();
        store
            .add_calibration("nd_transmission", &sample_artifact(), "2026-01-01T00:00:00")
            .unwrap();
        let artifact = store.get_default_calibration("nd_transmission").unwrap();
        assert!(artifact.is_some());
    }

    #[test]
    fn get_calibration_file_resolves_globally_by_filename() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CalibrationStore::open(dir.path()).unwrap();
        let filename = store
            .add_calibration("throughput", &sample_artifact(), "2026-01-01T00:00:00")
            .unwrap();
        let artifact = store.get_calibration_file(&filename).unwrap();
        assert_eq!(artifact.wavelength_nm, sample_artifact().wavelength_nm);
    }

    #[test]
    fn reopening_the_store_reloads_the_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = CalibrationStore::open(dir.path()).unwrap();
            store
                .add_calibration("throughput", &sample_artifact(), "2026-01-01T00:00:00")
                .unwrap();
        }
        let reopened = CalibrationStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list_calibrations(Some("throughput")).len(), 1);
    }
}
