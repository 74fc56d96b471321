//! Time-aligned spectra writer: one sink per window, filled block by block.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dr_common::timetag::datetime_to_timetag;
use tracing::debug;

use crate::block::Block;
use crate::reduction::{Reduction, StreamParameters};
use crate::sink::{FormatSink, SinkError, SinkFactory, SinkSchema};
use crate::slice::{sample_timestamps, select_slice, SliceKind};
use crate::window::WindowError;

/// Per-window state fixed at start.
struct SpectraStream {
    sink: Box<dyn FormatSink>,
    time_step: u64,
    start_tag: u64,
    stop_tag: u64,
    nchan: usize,
    npol: usize,
}

/// Writes dynamic spectra for a single beam into a [`FormatSink`].
pub struct SpectraWriter {
    factory: Arc<dyn SinkFactory>,
    stream: Option<SpectraStream>,
}

impl SpectraWriter {
    pub fn new(factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            factory,
            stream: None,
        }
    }

    /// Derive the output layout and open the sink.
    ///
    /// The reduction, if any, reshapes the stream before the sink is sized.
    pub(crate) fn start(
        &mut self,
        path: &Path,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
        params: &StreamParameters,
        reduction: Option<&Reduction>,
    ) -> Result<(), WindowError> {
        let (params, frequencies) = match reduction {
            Some(r) => r.apply_to(params)?,
            None => (params.clone(), params.frequencies()),
        };

        let seconds = (stop_time - start_time)
            .num_microseconds()
            .unwrap_or(i64::MAX) as f64
            / 1e6;
        let schema = SinkSchema {
            beam: params.beam,
            frequencies,
            integration_time: params.integration_time(),
            pols: params.pols.clone(),
            capacity: params.expected_records(seconds),
        };
        let sink = self.factory.create(path, &schema)?;

        debug!(
            path = %path.display(),
            records = schema.capacity,
            navg = params.navg,
            nchan = params.nchan,
            npol = params.npol(),
            "Spectra writer started"
        );

        self.stream = Some(SpectraStream {
            sink,
            time_step: params.time_step(),
            start_tag: datetime_to_timetag(start_time),
            stop_tag: datetime_to_timetag(stop_time),
            nchan: params.nchan,
            npol: params.npol(),
        });
        Ok(())
    }

    /// Write the in-window part of a block at `cursor`. Returns the number
    /// of integrations accepted.
    pub(crate) fn write(
        &mut self,
        cursor: usize,
        time_tag: u64,
        block: &Block,
        reduction: Option<&Reduction>,
    ) -> Result<usize, WindowError> {
        let stream = self.stream.as_mut().ok_or(WindowError::NotStarted)?;

        let reduced;
        let block = match reduction {
            Some(r) => {
                reduced = r.reduce(block)?;
                &reduced
            }
            None => block,
        };

        let shape = block.shape();
        if shape.nstream == 0 || shape.nchan != stream.nchan || shape.npol != stream.npol {
            return Err(WindowError::Shape {
                nchan: stream.nchan,
                npol: stream.npol,
                actual: shape,
            });
        }

        let tags = sample_timestamps(time_tag, stream.time_step, block.ntime());
        let slice = select_slice(&tags, stream.start_tag, stream.stop_tag);
        if slice.kind != SliceKind::Contained {
            debug!(kind = ?slice.kind, accepted = slice.len(), of = tags.len(), "Partial block");
        }
        if slice.is_empty() {
            return Ok(0);
        }

        stream.sink.append_time(cursor, &tags[slice.range.clone()])?;
        for pol in 0..stream.npol {
            let rows = block.pol_rows(slice.range.clone(), 0, pol);
            stream.sink.append_field(pol, cursor, &rows)?;
        }
        Ok(slice.len())
    }

    pub(crate) fn close(&mut self) -> Result<(), SinkError> {
        match self.stream.as_mut() {
            Some(stream) => stream.sink.close(),
            None => Ok(()),
        }
    }
}
