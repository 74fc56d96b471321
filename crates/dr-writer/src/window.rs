//! Recording windows.
//!
//! A window is one scheduled output covering `[start_time, stop_time]`. It is
//! *active* while the clock reads within `margin` of those bounds and
//! *expired* once the clock passes `stop_time + margin`. Blocks are only
//! accepted between `start()` and `stop()`; the format variant decides what
//! a write produces.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dr_common::ClockSource;
use dr_config::RecordingConfig;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::block::{Block, BlockShape};
use crate::postprocess::{PostProcessError, PostProcessor};
use crate::reduction::{Reduction, ReductionError, StreamParameters};
use crate::sink::{SinkError, SinkFactory};
use crate::snapshot::{SnapshotError, SnapshotWriter};
use crate::spectra::SpectraWriter;

/// Default tolerance around window bounds.
pub fn default_margin() -> Duration {
    Duration::seconds(1)
}

/// Margin from a number of seconds, to the microsecond.
pub fn margin_from_secs(secs: f64) -> Duration {
    Duration::microseconds((secs * 1e6).round() as i64)
}

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("window start {start} is not before stop {stop}")]
    InvalidBounds {
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    },

    #[error("window is active but has not been started")]
    NotStarted,

    #[error("window has already been started")]
    AlreadyStarted,

    #[error("window has already been stopped")]
    Finalized,

    #[error("reductions are not supported for {0} windows")]
    ReductionUnsupported(&'static str),

    #[error("block shape {actual:?} does not match {nchan} channels x {npol} polarizations")]
    Shape {
        nchan: usize,
        npol: usize,
        actual: BlockShape,
    },

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("reduction error: {0}")]
    Reduction(#[from] ReductionError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),
}

/// Result of offering a block to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The window is not active; route the block elsewhere or drop it.
    NotActive,
    /// The block was consumed; `accepted` records were written.
    Written { accepted: usize },
}

/// What a window produces.
pub enum WindowFormat {
    /// One spectra output per window.
    Spectra(SpectraWriter),
    /// One snapshot artifact per write.
    Snapshot(SnapshotWriter),
}

impl WindowFormat {
    fn kind(&self) -> &'static str {
        match self {
            WindowFormat::Spectra(_) => "spectra",
            WindowFormat::Snapshot(_) => "snapshot",
        }
    }
}

/// One scheduled output.
pub struct RecordingWindow {
    path: PathBuf,
    start_time: DateTime<Utc>,
    stop_time: DateTime<Utc>,
    margin: Duration,
    reduction: Option<Reduction>,
    format: WindowFormat,
    post: PostProcessor,
    clock: Arc<dyn ClockSource>,
    started: bool,
    finalized: bool,
    cursor: usize,
}

impl std::fmt::Debug for RecordingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingWindow")
            .field("path", &self.path)
            .field("format", &self.format.kind())
            .field("start_time", &self.start_time)
            .field("stop_time", &self.stop_time)
            .field("reduction", &self.reduction)
            .field("started", &self.started)
            .field("finalized", &self.finalized)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl RecordingWindow {
    pub fn new(
        path: impl Into<PathBuf>,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
        format: WindowFormat,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, WindowError> {
        if start_time >= stop_time {
            return Err(WindowError::InvalidBounds {
                start: start_time,
                stop: stop_time,
            });
        }
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);

        Ok(Self {
            path,
            start_time,
            stop_time,
            margin: default_margin(),
            reduction: None,
            format,
            post: PostProcessor::None,
            clock,
            started: false,
            finalized: false,
            cursor: 0,
        })
    }

    /// Spectra window writing through sinks from `factory`.
    pub fn spectra(
        path: impl Into<PathBuf>,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
        factory: Arc<dyn SinkFactory>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, WindowError> {
        let format = WindowFormat::Spectra(SpectraWriter::new(factory));
        Self::new(path, start_time, stop_time, format, clock)
    }

    /// Snapshot window emitting one artifact per write.
    pub fn snapshot(
        path: impl Into<PathBuf>,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
        writer: SnapshotWriter,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, WindowError> {
        Self::new(path, start_time, stop_time, WindowFormat::Snapshot(writer), clock)
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Apply the `recording` config section: bound margin and archive
    /// post-processing.
    pub fn with_recording_config(self, config: &RecordingConfig) -> Self {
        self.with_margin(margin_from_secs(config.margin_secs))
            .with_post_processor(PostProcessor::from_config(config))
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Result<Self, WindowError> {
        if let WindowFormat::Snapshot(_) = self.format {
            return Err(WindowError::ReductionUnsupported(self.format.kind()));
        }
        self.reduction = Some(reduction);
        Ok(self)
    }

    pub fn with_post_processor(mut self, post: PostProcessor) -> Self {
        self.post = post;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn stop_time(&self) -> DateTime<Utc> {
        self.stop_time
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    pub fn reduction(&self) -> Option<&Reduction> {
        self.reduction.as_ref()
    }

    /// Records written so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Clock reading within `[start - margin, stop + margin]`.
    pub fn is_active(&self) -> bool {
        let now = self.clock.now();
        now >= self.start_time - self.margin && now <= self.stop_time + self.margin
    }

    pub fn is_expired(&self) -> bool {
        self.clock.now() > self.stop_time + self.margin
    }

    /// Time until the nominal stop.
    pub fn time_left(&self) -> Duration {
        self.stop_time - self.clock.now()
    }

    /// Current size of the output, if it exists yet.
    pub fn size(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }

    /// Prepare the output for the given stream.
    pub fn start(&mut self, params: &StreamParameters) -> Result<(), WindowError> {
        if self.started {
            return Err(WindowError::AlreadyStarted);
        }
        if self.finalized {
            return Err(WindowError::Finalized);
        }

        match &mut self.format {
            WindowFormat::Spectra(writer) => writer.start(
                &self.path,
                self.start_time,
                self.stop_time,
                params,
                self.reduction.as_ref(),
            )?,
            WindowFormat::Snapshot(writer) => writer.start(params)?,
        }
        self.started = true;

        info!(
            path = %self.path.display(),
            format = self.format.kind(),
            start = %self.start_time,
            stop = %self.stop_time,
            "Window started"
        );
        Ok(())
    }

    /// Offer a block starting at `time_tag`.
    pub fn write(&mut self, time_tag: u64, block: &Block) -> Result<WriteOutcome, WindowError> {
        if !self.is_active() || self.finalized {
            return Ok(WriteOutcome::NotActive);
        }
        if !self.started {
            return Err(WindowError::NotStarted);
        }

        let accepted = match &mut self.format {
            WindowFormat::Spectra(writer) => {
                writer.write(self.cursor, time_tag, block, self.reduction.as_ref())?
            }
            WindowFormat::Snapshot(writer) => {
                writer.write(&self.path, time_tag, block)?;
                1
            }
        };
        self.cursor += accepted;
        Ok(WriteOutcome::Written { accepted })
    }

    /// Close the output and run post-processing once.
    ///
    /// Returns the post-processing artifact, if one was produced. Calls
    /// after the first are no-ops.
    pub fn stop(&mut self) -> Result<Option<PathBuf>, WindowError> {
        if self.finalized {
            return Ok(None);
        }
        self.finalized = true;

        match &mut self.format {
            WindowFormat::Spectra(writer) => writer.close()?,
            WindowFormat::Snapshot(writer) => writer.stop()?,
        }

        let mut artifact = None;
        if self.path.exists() {
            match self.post.run(&self.path) {
                Ok(path) => artifact = Some(path),
                Err(PostProcessError::NotImplemented) => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Post-processing failed; raw output kept");
                    return Err(e.into());
                }
            }
        }

        info!(
            path = %self.path.display(),
            records = self.cursor,
            "Window stopped"
        );
        Ok(artifact)
    }

    /// Stop now if active, then push `stop_time` into the past so the window
    /// never becomes active again.
    ///
    /// Returns the artifact of the stop this triggered, if any.
    pub fn cancel(&mut self) -> Result<Option<PathBuf>, WindowError> {
        let result = if self.is_active() {
            self.stop()
        } else {
            Ok(None)
        };
        self.stop_time = self.clock.now() - self.margin * 2;
        debug!(path = %self.path.display(), "Window cancelled");
        result
    }
}
