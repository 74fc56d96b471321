//! Stream parameters and data reduction descriptors.
//!
//! The numeric reduction itself is supplied by the caller through
//! [`BlockReducer`]; this module only knows how a reduction reshapes the
//! output (cadence, channel count, bandwidth, polarization set).

use std::fmt;
use std::sync::Arc;

use dr_common::timetag::{chan_to_freq, CHAN_BW, TICKS_PER_CHANNEL};
use thiserror::Error;

use crate::block::Block;

#[derive(Error, Debug)]
pub enum ReductionError {
    #[error("invalid reduction: {0}")]
    Invalid(String),

    #[error("reducer failed: {0}")]
    Reducer(String),
}

/// Shape of the incoming spectrometer stream, fixed for a window.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParameters {
    pub beam: u32,
    /// First channel number.
    pub chan0: u32,
    /// Spectra averaged per integration.
    pub navg: u64,
    pub nchan: usize,
    /// Channel bandwidth in Hz.
    pub chan_bw: f64,
    /// Polarization product names, e.g. `XX`, `YY`.
    pub pols: Vec<String>,
}

impl StreamParameters {
    pub fn npol(&self) -> usize {
        self.pols.len()
    }

    /// Centre frequency of each channel in Hz.
    pub fn frequencies(&self) -> Vec<f64> {
        let base = chan_to_freq(self.chan0);
        (0..self.nchan)
            .map(|i| base + i as f64 * self.chan_bw)
            .collect()
    }

    /// Integration time in seconds.
    pub fn integration_time(&self) -> f64 {
        self.navg as f64 / CHAN_BW
    }

    /// Time-tag step between consecutive integrations.
    pub fn time_step(&self) -> u64 {
        self.navg * TICKS_PER_CHANNEL
    }

    /// Number of integrations a window of `seconds` is expected to hold.
    pub fn expected_records(&self, seconds: f64) -> usize {
        (seconds / self.integration_time()).max(0.0) as usize + 1
    }
}

/// Caller-supplied numeric reduction of a block.
pub trait BlockReducer: Send + Sync {
    fn reduce(&self, block: &Block, reduction: &Reduction) -> Result<Block, ReductionError>;
}

/// Resolution reduction applied to every block before it is written.
#[derive(Clone)]
pub struct Reduction {
    /// Integrations averaged together.
    pub time_factor: u64,
    /// Channels averaged together.
    pub chan_factor: usize,
    /// Output polarization products.
    pub pols: Vec<String>,
    reducer: Arc<dyn BlockReducer>,
}

impl fmt::Debug for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reduction")
            .field("time_factor", &self.time_factor)
            .field("chan_factor", &self.chan_factor)
            .field("pols", &self.pols)
            .finish_non_exhaustive()
    }
}

impl Reduction {
    pub fn new(
        time_factor: u64,
        chan_factor: usize,
        pols: Vec<String>,
        reducer: Arc<dyn BlockReducer>,
    ) -> Result<Self, ReductionError> {
        if time_factor == 0 || chan_factor == 0 {
            return Err(ReductionError::Invalid(
                "reduction factors must be at least 1".to_string(),
            ));
        }
        if pols.is_empty() {
            return Err(ReductionError::Invalid(
                "reduction must keep at least one polarization".to_string(),
            ));
        }
        Ok(Self {
            time_factor,
            chan_factor,
            pols,
            reducer,
        })
    }

    /// Output stream parameters after reduction.
    ///
    /// Returns the reduced parameters together with the reduced channel
    /// frequencies (each the mean of the channels it replaces).
    pub fn apply_to(
        &self,
        params: &StreamParameters,
    ) -> Result<(StreamParameters, Vec<f64>), ReductionError> {
        if params.nchan % self.chan_factor != 0 {
            return Err(ReductionError::Invalid(format!(
                "{} channels do not divide by {}",
                params.nchan, self.chan_factor
            )));
        }

        let freqs = params
            .frequencies()
            .chunks(self.chan_factor)
            .map(|c| c.iter().sum::<f64>() / c.len() as f64)
            .collect();

        let reduced = StreamParameters {
            beam: params.beam,
            chan0: params.chan0,
            navg: params.navg * self.time_factor,
            nchan: params.nchan / self.chan_factor,
            chan_bw: params.chan_bw * self.chan_factor as f64,
            pols: self.pols.clone(),
        };
        Ok((reduced, freqs))
    }

    pub fn reduce(&self, block: &Block) -> Result<Block, ReductionError> {
        self.reducer.reduce(block, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockShape;

    struct Passthrough;

    impl BlockReducer for Passthrough {
        fn reduce(&self, block: &Block, _: &Reduction) -> Result<Block, ReductionError> {
            Ok(block.clone())
        }
    }

    fn params() -> StreamParameters {
        StreamParameters {
            beam: 1,
            chan0: 1000,
            navg: 24,
            nchan: 8,
            chan_bw: CHAN_BW,
            pols: vec!["XX".into(), "YY".into(), "XY_real".into(), "XY_imag".into()],
        }
    }

    #[test]
    fn test_timing_constants() {
        let p = params();
        assert_eq!(p.time_step(), 24 * 8192);
        assert!((p.integration_time() - 24.0 / CHAN_BW).abs() < 1e-12);
        // 1 s at ~1.003 ms per integration
        assert_eq!(p.expected_records(1.0), (CHAN_BW / 24.0) as usize + 1);
    }

    #[test]
    fn test_reduction_reshapes_stream() {
        let reduction =
            Reduction::new(4, 2, vec!["I".into()], Arc::new(Passthrough)).unwrap();
        let p = params();
        let (reduced, freqs) = reduction.apply_to(&p).unwrap();

        assert_eq!(reduced.navg, 96);
        assert_eq!(reduced.nchan, 4);
        assert_eq!(reduced.chan_bw, 2.0 * CHAN_BW);
        assert_eq!(reduced.pols, vec!["I".to_string()]);

        let full = p.frequencies();
        assert_eq!(freqs.len(), 4);
        assert!((freqs[0] - (full[0] + full[1]) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_indivisible_channels_rejected() {
        let reduction =
            Reduction::new(1, 3, vec!["XX".into()], Arc::new(Passthrough)).unwrap();
        assert!(reduction.apply_to(&params()).is_err());
    }

    #[test]
    fn test_zero_factor_rejected() {
        assert!(Reduction::new(0, 1, vec!["XX".into()], Arc::new(Passthrough)).is_err());
    }

    #[test]
    fn test_reduce_delegates() {
        let reduction =
            Reduction::new(1, 1, vec!["XX".into()], Arc::new(Passthrough)).unwrap();
        let block = Block::zeros(BlockShape::new(2, 1, 8, 4));
        assert_eq!(reduction.reduce(&block).unwrap(), block);
    }
}
