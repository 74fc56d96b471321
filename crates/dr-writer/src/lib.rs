//! Recording windows and the writers behind them.
//!
//! This crate provides:
//! - [`RecordingWindow`]: the scheduled-output state machine
//! - Time-aligned block slicing into spectra sinks (Parquet or in-memory)
//! - Per-call snapshot artifacts in process-private scratch space
//! - Post-processing (archive packaging) after a window closes
//! - [`WindowQueue`]: routing blocks to whichever window is active

pub mod block;
pub mod postprocess;
pub mod queue;
pub mod reduction;
pub mod sink;
pub mod slice;
pub mod snapshot;
pub mod spectra;
pub mod window;

pub use block::{Block, BlockError, BlockShape};
pub use postprocess::{ArchiveStage, PostProcessError, PostProcessor};
pub use queue::{Reaped, WindowQueue};
pub use reduction::{BlockReducer, Reduction, ReductionError, StreamParameters};
pub use sink::{
    FormatSink, MemorySink, MemorySinkFactory, ParquetSink, ParquetSinkFactory, SinkError,
    SinkFactory, SinkSchema,
};
pub use slice::{select_slice, SliceKind, WriteSlice};
pub use snapshot::{ScratchDir, SnapshotError, SnapshotWriter, Station};
pub use spectra::SpectraWriter;
pub use window::{RecordingWindow, WindowError, WindowFormat, WriteOutcome};
