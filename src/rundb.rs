//! Run database (`SPEC_FULL.md` §4.F.FULL, §6.FULL persisted layout),
//! grounded on `original_source/pandora/database/db.py`'s `PandoraDatabase`
//! and `original_source/pandora/database/columns_map.py`'s typed-column
//! pattern.
//!
//! One `RunDatabase` owns one run: a `YYYYMMDDNNN` run id, a single
//! append-and-rewrite CSV of [`ExposureRow`]s, and the run's `lightcurves/`
//! directory scaffold (`SPEC_FULL.md` §9.FULL — no per-exposure lightcurve
//! file writer is revived, only the directory).

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{PandoraError, Result};
use crate::limits::RUN_ID_MAX_SUFFIX;

/// `YYYYMMDDNNN`: an 8-digit date plus a 3-digit within-day sequence
/// number, `001..=999`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(String);

impl RunId {
    fn new(date_str: &str, suffix: u32) -> Self {
        RunId(format!("{date_str}{suffix:03}"))
    }

    /// The underlying `YYYYMMDDNNN` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = PandoraError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 11 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(PandoraError::StateInvariant(format!(
                "'{s}' is not a valid run id (expected YYYYMMDDNNN)"
            )));
        }
        Ok(RunId(s.to_string()))
    }
}

/// Whether a [`RunDatabase`] may append new exposures or only read back ones
/// already on disk (`SPEC_FULL.md` §9.FULL, grounded on `db.py`'s
/// `writing_mode` flag and its read-only `_latest_run_id_for_date` path,
/// which never touches `.run_cache.csv`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Allocate or reuse a run id and allow `write_exposure`.
    Write,
    /// Resolve the most recent run id for the date without writing to the
    /// run-id cache; `write_exposure` is rejected.
    ReadOnly,
}

/// One sample row of a charge-mode exposure (`SPEC_FULL.md` §4.E.FULL): the
/// run CSV's charge-extension columns, populated once per acquired sample
/// rather than once per exposure.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeFields {
    /// Seconds since the acquisition was armed.
    pub sample_time: f64,
    /// Input-channel charge sample, coulombs.
    pub charge_input: f64,
    /// Output-channel charge sample, coulombs.
    pub charge_output: f64,
}

/// One row of the run's exposure CSV (`spec.md` §6 column list).
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRow {
    /// Commanded exposure time, seconds.
    pub exptime: f64,
    /// Measured elapsed time, seconds.
    pub effective_exptime: f64,
    /// ISO-8601 timestamp of the exposure start.
    pub timestamp: String,
    /// Monochromator wavelength at the time of exposure, nm.
    pub wavelength: f64,
    /// Mean input-channel current, amps.
    pub current_input: f64,
    /// Standard deviation of the input-channel current, amps.
    pub current_input_err: f64,
    /// Mean output-channel current, amps.
    pub current_output: f64,
    /// Standard deviation of the output-channel current, amps.
    pub current_output_err: f64,
    /// Per-flip-mount on/off state, keyed by flip mount name.
    pub flip_mounts: IndexMap<String, bool>,
    /// Name of the ND-filter Zaber slot in place.
    pub nd_filter: String,
    /// Name of the pinhole-mask Zaber slot in place.
    pub pinhole_mask: String,
    /// Spectrometer focus position label, if tracked.
    pub focus_position: String,
    /// Whether the shutter was open during the exposure.
    pub shutter: bool,
    /// Telescope altitude at exposure time, degrees.
    pub alt: f64,
    /// Telescope azimuth at exposure time, degrees.
    pub az: f64,
    /// Free-text observation description/tag.
    pub description: String,
    /// Present only for charge-mode exposures (`measure-pandora-charge`).
    pub charge: Option<ChargeFields>,
}

const FIXED_COLUMNS: &[&str] = &[
    "expid",
    "exptime",
    "effective_exptime",
    "timestamp",
    "wavelength",
    "currentInput",
    "currentInputErr",
    "currentOutput",
    "currentOutputErr",
];

const TRAILING_COLUMNS: &[&str] = &[
    "ndFilter",
    "pinholeMask",
    "focusPosition",
    "shutter",
    "alt",
    "az",
    "Description",
    "sampleTime",
    "chargeInput",
    "chargeOutput",
    "measurementMode",
];

fn build_header(flip_mount_names: &[String]) -> Vec<String> {
    let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|s| s.to_string()).collect();
    header.extend(flip_mount_names.iter().cloned());
    header.extend(TRAILING_COLUMNS.iter().map(|s| s.to_string()));
    header
}

fn row_to_record(expid: u32, row: &ExposureRow, flip_mount_names: &[String]) -> Vec<String> {
    let mut record = vec![
        expid.to_string(),
        row.exptime.to_string(),
        row.effective_exptime.to_string(),
        row.timestamp.clone(),
        row.wavelength.to_string(),
        row.current_input.to_string(),
        row.current_input_err.to_string(),
        row.current_output.to_string(),
        row.current_output_err.to_string(),
    ];
    for name in flip_mount_names {
        let state = row.flip_mounts.get(name).copied().unwrap_or(false);
        record.push(state.to_string());
    }
    record.push(row.nd_filter.clone());
    record.push(row.pinhole_mask.clone());
    record.push(row.focus_position.clone());
    record.push(row.shutter.to_string());
    record.push(row.alt.to_string());
    record.push(row.az.to_string());
    record.push(row.description.clone());
    match &row.charge {
        Some(charge) => {
            record.push(charge.sample_time.to_string());
            record.push(charge.charge_input.to_string());
            record.push(charge.charge_output.to_string());
            record.push("CHAR".to_string());
        }
        None => {
            record.push(String::new());
            record.push(String::new());
            record.push(String::new());
            record.push(String::new());
        }
    }
    record
}

fn parse_bool_cell(cell: &str) -> bool {
    cell == "true"
}

fn parse_f64_cell(cell: &str) -> f64 {
    cell.parse().unwrap_or(f64::NAN)
}

fn record_to_row(record: &csv::StringRecord, header: &[String], flip_mount_names: &[String]) -> Result<(u32, ExposureRow)> {
    let col = |name: &str| -> Result<&str> {
        let idx = header.iter().position(|h| h == name).ok_or_else(|| {
            PandoraError::StateInvariant(format!("run data file is missing column '{name}'"))
        })?;
        Ok(record.get(idx).unwrap_or(""))
    };

    let expid: u32 = col("expid")?
        .parse()
        .map_err(|_| PandoraError::StateInvariant("run data file has a non-numeric expid".into()))?;

    let mut flip_mounts = IndexMap::new();
    for name in flip_mount_names {
        flip_mounts.insert(name.clone(), parse_bool_cell(col(name)?));
    }

    let measurement_mode = col("measurementMode")?;
    let charge = if measurement_mode == "CHAR" {
        Some(ChargeFields {
            sample_time: parse_f64_cell(col("sampleTime")?),
            charge_input: parse_f64_cell(col("chargeInput")?),
            charge_output: parse_f64_cell(col("chargeOutput")?),
        })
    } else {
        None
    };

    Ok((
        expid,
        ExposureRow {
            exptime: parse_f64_cell(col("exptime")?),
            effective_exptime: parse_f64_cell(col("effective_exptime")?),
            timestamp: col("timestamp")?.to_string(),
            wavelength: parse_f64_cell(col("wavelength")?),
            current_input: parse_f64_cell(col("currentInput")?),
            current_input_err: parse_f64_cell(col("currentInputErr")?),
            current_output: parse_f64_cell(col("currentOutput")?),
            current_output_err: parse_f64_cell(col("currentOutputErr")?),
            flip_mounts,
            nd_filter: col("ndFilter")?.to_string(),
            pinhole_mask: col("pinholeMask")?.to_string(),
            focus_position: col("focusPosition")?.to_string(),
            shutter: parse_bool_cell(col("shutter")?),
            alt: parse_f64_cell(col("alt")?),
            az: parse_f64_cell(col("az")?),
            description: col("Description")?.to_string(),
            charge,
        },
    ))
}

/// The run-scoped exposure log plus its supporting directory scaffold.
pub struct RunDatabase {
    run_id: RunId,
    mode: OpenMode,
    flip_mount_names: Vec<String>,
    run_data_file: PathBuf,
    lightcurves_dir: PathBuf,
    next_expid: u32,
    rows: Vec<(u32, ExposureRow)>,
}

impl RunDatabase {
    /// Open (or allocate) a run under `root`. `date` defaults to today
    /// (`YYYYMMDD`) if `None`. `flip_mount_names` fixes the run's flip
    /// mount column order and must be stable for the lifetime of the run;
    /// the controller façade passes its configured flip mount ids sorted
    /// alphabetically so the column order is deterministic across restarts.
    pub fn open(
        root: &Path,
        date: Option<&str>,
        explicit_run_id: Option<RunId>,
        mode: OpenMode,
        flip_mount_names: Vec<String>,
    ) -> Result<Self> {
        let date_str = match date {
            Some(d) => d.to_string(),
            None => chrono::Local::now().format("%Y%m%d").to_string(),
        };
        let cache_file = root.join(".run_cache.csv");

        let run_id = match explicit_run_id {
            Some(id) => id,
            None => match mode {
                OpenMode::Write => generate_new_run_id(&date_str, &cache_file)?,
                OpenMode::ReadOnly => latest_run_id_for_date(&date_str, &cache_file)?,
            },
        };

        let data_path = root.join("data");
        let lightcurves_dir = root.join("lightcurves").join(run_id.as_str());
        fs::create_dir_all(&data_path).map_err(PandoraError::from)?;
        fs::create_dir_all(&lightcurves_dir).map_err(PandoraError::from)?;
        let run_data_file = data_path.join(format!("{run_id}.csv"));

        let (next_expid, rows) = if run_data_file.exists() {
            load_existing(&run_data_file, &flip_mount_names)?
        } else {
            (0, Vec::new())
        };

        Ok(Self {
            run_id,
            mode,
            flip_mount_names,
            run_data_file,
            lightcurves_dir,
            next_expid,
            rows,
        })
    }

    /// This run's id.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// This run's `lightcurves/<run_id>/` directory.
    pub fn lightcurves_dir(&self) -> &Path {
        &self.lightcurves_dir
    }

    /// Append one exposure, assign it the next sequential [`ExposureId`],
    /// and rewrite the run's CSV from the in-memory row list. Rejected in
    /// [`OpenMode::ReadOnly`].
    pub fn write_exposure(&mut self, row: ExposureRow) -> Result<u32> {
        if self.mode == OpenMode::ReadOnly {
            return Err(PandoraError::StateInvariant(
                "cannot write an exposure to a read-only run database".into(),
            ));
        }
        let expid = self.next_expid;
        self.next_expid += 1;
        self.rows.push((expid, row));
        self.rewrite_csv()?;
        Ok(expid)
    }

    /// Look up a previously written exposure by id.
    pub fn get_exposure(&self, expid: u32) -> Result<&ExposureRow> {
        self.rows
            .iter()
            .find(|(id, _)| *id == expid)
            .map(|(_, row)| row)
            .ok_or_else(|| PandoraError::StateInvariant(format!("no exposure with id {expid} in this run")))
    }

    /// Number of exposures written so far this run.
    pub fn exposure_count(&self) -> usize {
        self.rows.len()
    }

    fn rewrite_csv(&self) -> Result<()> {
        let file = File::create(&self.run_data_file).map_err(PandoraError::from)?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(build_header(&self.flip_mount_names))
            .map_err(|e| PandoraError::StateInvariant(format!("failed to write run data header: {e}")))?;
        for (expid, row) in &self.rows {
            writer
                .write_record(row_to_record(*expid, row, &self.flip_mount_names))
                .map_err(|e| PandoraError::StateInvariant(format!("failed to write exposure row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| PandoraError::StateInvariant(format!("failed to flush run data file: {e}")))
    }
}

fn load_existing(path: &Path, flip_mount_names: &[String]) -> Result<(u32, Vec<(u32, ExposureRow)>)> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| PandoraError::StateInvariant(format!("failed to open run data file: {e}")))?;
    let header: Vec<String> = reader
        .headers()
        .map_err(|e| PandoraError::StateInvariant(format!("failed to read run data header: {e}")))?
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PandoraError::StateInvariant(format!("malformed run data row: {e}")))?;
        rows.push(record_to_row(&record, &header, flip_mount_names)?);
    }
    let next_expid = rows.iter().map(|(id, _)| *id).max().map_or(0, |max| max + 1);
    Ok((next_expid, rows))
}

fn generate_new_run_id(date_str: &str, cache_file: &Path) -> Result<RunId> {
    if !cache_file.exists() {
        let file = File::create(cache_file).map_err(PandoraError::from)?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(["run_id"])
            .map_err(|e| PandoraError::StateInvariant(format!("failed to seed run-id cache: {e}")))?;
        writer
            .write_record([format!("{date_str}001")])
            .map_err(|e| PandoraError::StateInvariant(format!("failed to seed run-id cache: {e}")))?;
        writer
            .flush()
            .map_err(|e| PandoraError::StateInvariant(format!("failed to seed run-id cache: {e}")))?;
        return Ok(RunId::new(date_str, 1));
    }

    let existing_suffix = max_suffix_for_date(date_str, cache_file)?;
    let new_suffix = existing_suffix.map_or(1, |s| s + 1);
    if new_suffix > RUN_ID_MAX_SUFFIX {
        return Err(PandoraError::StateInvariant(format!(
            "run id sequence for {date_str} is exhausted (>{RUN_ID_MAX_SUFFIX} runs today)"
        )));
    }
    let new_run_id = RunId::new(date_str, new_suffix);

    let file = OpenOptions::new()
        .append(true)
        .open(cache_file)
        .map_err(PandoraError::from)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer
        .write_record([new_run_id.as_str()])
        .map_err(|e| PandoraError::StateInvariant(format!("failed to append to run-id cache: {e}")))?;
    writer
        .flush()
        .map_err(|e| PandoraError::StateInvariant(format!("failed to append to run-id cache: {e}")))?;
    Ok(new_run_id)
}

fn latest_run_id_for_date(date_str: &str, cache_file: &Path) -> Result<RunId> {
    if !cache_file.exists() {
        return Ok(RunId::new(date_str, 1));
    }
    match max_suffix_for_date(date_str, cache_file)? {
        Some(suffix) => Ok(RunId::new(date_str, suffix)),
        None => Ok(RunId::new(date_str, 1)),
    }
}

fn max_suffix_for_date(date_str: &str, cache_file: &Path) -> Result<Option<u32>> {
    let mut reader = csv::Reader::from_path(cache_file)
        .map_err(|e| PandoraError::StateInvariant(format!("failed to read run-id cache: {e}")))?;
    let mut max_suffix = None;
    for record in reader.records() {
        let record = record.map_err(|e| PandoraError::StateInvariant(format!("malformed run-id cache row: {e}")))?;
        let Some(run_id) = record.get(0) else { continue };
        if run_id.len() == 11 && run_id.starts_with(date_str) {
            if let Ok(suffix) = run_id[8..11].parse::<u32>() {
                max_suffix = Some(max_suffix.map_or(suffix, |m: u32| m.max(suffix)));
            }
        }
    }
    Ok(max_suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip_mounts() -> Vec<String> {
        vec!["f1".to_string(), "f2".to_string(), "f3".to_string()]
    }

    fn sample_row() -> ExposureRow {
        ExposureRow {
            exptime: 1.0,
            effective_exptime: 1.02,
            timestamp: "2026-01-01T00:00:00".to_string(),
            wavelength: 532.0,
            current_input: 1.0e-9,
            current_input_err: 1.0e-11,
            current_output: 0.9e-9,
            current_output_err: 1.0e-11,
            flip_mounts: IndexMap::from([
                ("f1".to_string(), true),
                ("f2".to_string(), false),
                ("f3".to_string(), false),
            ]),
            nd_filter: "CLEAR".to_string(),
            pinhole_mask: "OPEN".to_string(),
            focus_position: "UNKNOWN".to_string(),
            shutter: true,
            alt: 45.0,
            az: 180.0,
            description: "acq".to_string(),
            charge: None,
        }
    }

    #[test]
    fn first_run_of_the_day_allocates_suffix_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = RunDatabase::open(dir.path(), Some("20260101"), None, OpenMode::Write, flip_mounts()).unwrap();
        assert_eq!(db.run_id().as_str(), "20260101001");
        let expid = db.write_exposure(sample_row()).unwrap();
        assert_eq!(expid, 0);
    }

    #[test]
    fn second_run_of_the_day_increments_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let _first = RunDatabase::open(dir.path(), Some("20251120"), None, OpenMode::Write, flip_mounts()).unwrap();
        let second = RunDatabase::open(dir.path(), Some("20251120"), None, OpenMode::Write, flip_mounts()).unwrap();
        assert_eq!(second.run_id().as_str(), "20251120002");
    }

    #[test]
    fn readonly_open_does_not_touch_cache() {
        let dir = tempfile::tempdir().unwrap();
        let readonly = RunDatabase::open(dir.path(), Some("20260101"), None, OpenMode::ReadOnly, flip_mounts()).unwrap();
        assert_eq!(readonly.run_id().as_str(), "20260101001");
        assert!(!dir.path().join(".run_cache.csv").exists());
    }

    #[test]
    fn readonly_database_rejects_write_exposure() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = RunDatabase::open(dir.path(), Some("20260101"), None, OpenMode::ReadOnly, flip_mounts()).unwrap();
        assert!(matches!(
            db.write_exposure(sample_row()),
            Err(PandoraError::StateInvariant(_))
        ));
    }

    #[test]
    fn written_exposures_are_read_back_after_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let run_id: RunId = "20260101001".parse().unwrap();
        {
            let mut db = RunDatabase::open(
                dir.path(),
                Some("20260101"),
                Some(run_id.clone()),
                OpenMode::Write,
                flip_mounts(),
            )
            .unwrap();
            db.write_exposure(sample_row()).unwrap();
        }
        let reopened = RunDatabase::open(
            dir.path(),
            Some("20260101"),
            Some(run_id),
            OpenMode::Write,
            flip_mounts(),
        )
        .unwrap();
        assert_eq!(reopened.exposure_count(), 1);
        let row = reopened.get_exposure(0).unwrap();
        assert_eq!(row.nd_filter, "CLEAR");
        assert!(row.flip_mounts["f1"]);
    }

    #[test]
    fn reopening_a_run_continues_the_expid_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let run_id: RunId = "20260101001".parse().unwrap();
        {
            let mut db = RunDatabase::open(
                dir.path(),
                Some("20260101"),
                Some(run_id.clone()),
                OpenMode::Write,
                flip_mounts(),
            )
            .unwrap();
            assert_eq!(db.write_exposure(sample_row()).unwrap(), 0);
            assert_eq!(db.write_exposure(sample_row()).unwrap(), 1);
        }
        let mut reopened = RunDatabase::open(
            dir.path(),
            Some("20260101"),
            Some(run_id),
            OpenMode::Write,
            flip_mounts(),
        )
        .unwrap();
        assert_eq!(reopened.write_exposure(sample_row()).unwrap(), 2);
    }

    #[test]
    fn unknown_exposure_id_is_a_state_invariant_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = RunDatabase::open(dir.path(), Some("20260101"), None, OpenMode::Write, flip_mounts()).unwrap();
        assert!(matches!(
            db.get_exposure(99),
            Err(PandoraError::StateInvariant(_))
        ));
    }

    #[test]
    fn run_id_rejects_malformed_strings() {
        assert!("not-a-run-id".parse::<RunId>().is_err());
        assert!("202601010".parse::<RunId>().is_err());
    }
}
