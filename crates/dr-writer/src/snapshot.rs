//! Per-call snapshot artifacts.
//!
//! Unlike spectra, which fill one output per window, a snapshot writer emits
//! one self-contained artifact per `write`: a template directory prepared at
//! start is copied into process-private scratch space, stamped with the
//! block's times, pointing and visibilities, zipped to
//! `<path>_<tag>.zip`, and the scratch copy removed.

use std::f64::consts::{PI, TAU};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use dr_common::timetag::timetag_to_datetime;
use dr_config::RecordingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::block::{Block, BlockShape};
use crate::postprocess::{package, PostProcessError};
use crate::reduction::StreamParameters;

pub const METADATA_FILE: &str = "metadata.json";
pub const DATA_FILE: &str = "data.bin";
const TEMPLATE_DIR: &str = "template";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packaging failed: {0}")]
    Package(#[from] PostProcessError),

    #[error("scratch entry already exists: {0}")]
    Collision(PathBuf),

    #[error("block shape {actual:?} does not match expected {expected:?}")]
    Shape {
        expected: BlockShape,
        actual: BlockShape,
    },

    #[error("snapshot writer has not been started")]
    NotStarted,
}

/// Observing station: location and antenna list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    /// Geodetic latitude in radians.
    pub lat: f64,
    /// East longitude in radians.
    pub lon: f64,
    pub antennas: Vec<String>,
}

impl Station {
    /// Baselines including autocorrelations.
    pub fn baselines(&self) -> usize {
        let n = self.antennas.len();
        n * (n + 1) / 2
    }
}

/// Process-private scratch directory, removed recursively when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

static SCRATCH_SEQ: AtomicU32 = AtomicU32::new(0);

impl ScratchDir {
    /// Create `<base>/<label>-<pid>-<n>`.
    pub fn create(base: &Path, label: &str) -> io::Result<Self> {
        let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = base.join(format!("{}-{}-{}", label, std::process::id(), seq));
        fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "Scratch directory created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Scratch directory removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Scratch cleanup failed"),
        }
    }
}

/// Contents of `metadata.json` inside each snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub station: Station,
    pub integration_time: f64,
    pub frequencies: Vec<f64>,
    pub pols: Vec<String>,
    pub baselines: usize,
    #[serde(default)]
    pub time: Option<SnapshotTime>,
    #[serde(default)]
    pub pointing: Option<Pointing>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTime {
    pub start: DateTime<Utc>,
    pub centre: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

/// Phase centre in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pointing {
    pub ra: f64,
    pub dec: f64,
}

struct Template {
    dir: PathBuf,
    shape: BlockShape,
    time_step: u64,
    freq0: f64,
}

/// Writer emitting one zipped snapshot per call.
pub struct SnapshotWriter {
    station: Station,
    scratch: ScratchDir,
    template: Option<Template>,
}

impl SnapshotWriter {
    /// Create the writer and its scratch directory under `scratch_base`.
    pub fn new(scratch_base: &Path, station: Station) -> Result<Self, SnapshotError> {
        let scratch = ScratchDir::create(scratch_base, "SnapshotWriter")?;
        Ok(Self {
            station,
            scratch,
            template: None,
        })
    }

    /// Scratch space under `recording.scratch_base`.
    pub fn from_config(config: &RecordingConfig, station: Station) -> Result<Self, SnapshotError> {
        Self::new(&config.scratch_base, station)
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Build the template every snapshot is copied from.
    pub fn start(&mut self, params: &StreamParameters) -> Result<(), SnapshotError> {
        let dir = self.scratch.path().join(TEMPLATE_DIR);
        fs::create_dir_all(&dir)?;

        let frequencies = params.frequencies();
        let shape = BlockShape::new(
            1,
            self.station.baselines(),
            params.nchan,
            params.npol(),
        );
        let metadata = SnapshotMetadata {
            station: self.station.clone(),
            integration_time: params.integration_time(),
            frequencies: frequencies.clone(),
            pols: params.pols.clone(),
            baselines: shape.nstream,
            time: None,
            pointing: None,
        };
        fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_vec_pretty(&metadata)?,
        )?;
        fs::write(dir.join(DATA_FILE), vec![0u8; shape.len() * 4])?;

        debug!(
            template = %dir.display(),
            baselines = shape.nstream,
            nchan = shape.nchan,
            npol = shape.npol,
            "Snapshot template created"
        );

        self.template = Some(Template {
            dir,
            shape,
            time_step: params.time_step(),
            freq0: frequencies.first().copied().unwrap_or_default(),
        });
        Ok(())
    }

    /// Materialize one snapshot from the first integration of `block`.
    ///
    /// Returns the path of the artifact written next to `path`.
    pub fn write(&self, path: &Path, time_tag: u64, block: &Block) -> Result<PathBuf, SnapshotError> {
        let template = self.template.as_ref().ok_or(SnapshotError::NotStarted)?;

        let actual = block.shape();
        let expected = template.shape;
        if actual.ntime == 0
            || (actual.nstream, actual.nchan, actual.npol)
                != (expected.nstream, expected.nchan, expected.npol)
        {
            return Err(SnapshotError::Shape { expected, actual });
        }

        let start = timetag_to_datetime(time_tag);
        let centre = timetag_to_datetime(time_tag + template.time_step / 2);
        let stop = timetag_to_datetime(time_tag + template.time_step);
        let tag = snapshot_tag(template.freq0, start);

        let work = self.scratch.path().join(&tag);
        if work.exists() {
            return Err(SnapshotError::Collision(work));
        }
        copy_dir(&template.dir, &work)?;

        let result = self.fill_and_package(&work, path, &tag, block, SnapshotTime { start, centre, stop });
        if let Err(e) = fs::remove_dir_all(&work) {
            warn!(path = %work.display(), error = %e, "Failed to remove scratch snapshot");
        }
        result
    }

    fn fill_and_package(
        &self,
        work: &Path,
        path: &Path,
        tag: &str,
        block: &Block,
        time: SnapshotTime,
    ) -> Result<PathBuf, SnapshotError> {
        let meta_path = work.join(METADATA_FILE);
        let mut metadata: SnapshotMetadata = serde_json::from_slice(&fs::read(&meta_path)?)?;
        metadata.pointing = Some(Pointing {
            ra: local_sidereal_angle(time.centre, self.station.lon),
            dec: self.station.lat,
        });
        metadata.time = Some(time);
        fs::write(&meta_path, serde_json::to_vec_pretty(&metadata)?)?;

        let bytes: Vec<u8> = block
            .time_slice(0)
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        fs::write(work.join(DATA_FILE), bytes)?;

        let artifact = artifact_path(path, tag);
        package(work, tag, &artifact)?;
        info!(artifact = %artifact.display(), "Snapshot written");
        Ok(artifact)
    }

    /// Remove the template and the scratch directory if it is empty.
    pub fn stop(&mut self) -> Result<(), SnapshotError> {
        if let Some(template) = self.template.take() {
            match fs::remove_dir_all(&template.dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        // Leftovers or a missing directory are both fine here.
        let _ = fs::remove_dir(self.scratch.path());
        Ok(())
    }
}

/// `<freq MHz>MHz_<YYYYmmdd_HHMMSS>`.
pub fn snapshot_tag(freq0: f64, at: DateTime<Utc>) -> String {
    format!("{:.0}MHz_{}", freq0 / 1e6, at.format("%Y%m%d_%H%M%S"))
}

/// `<path>_<tag>.zip`
pub fn artifact_path(path: &Path, tag: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!("_{}.zip", tag));
    PathBuf::from(name)
}

/// Local mean sidereal time as an angle in `[0, 2π)`.
pub fn local_sidereal_angle(at: DateTime<Utc>, lon: f64) -> f64 {
    let unix = at.timestamp() as f64 + at.timestamp_subsec_nanos() as f64 * 1e-9;
    let days_since_j2000 = unix / 86_400.0 + 2_440_587.5 - 2_451_545.0;
    let gmst_hours = 18.697_374_558 + 24.065_709_824_419_08 * days_since_j2000;
    (gmst_hours * PI / 12.0 + lon).rem_euclid(TAU)
}

fn copy_dir(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
