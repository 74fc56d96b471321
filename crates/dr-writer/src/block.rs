//! Time-tagged data blocks as delivered by the upstream pipeline.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BlockError {
    #[error("block shape {shape:?} needs {expected} values, got {actual}")]
    LengthMismatch {
        shape: BlockShape,
        expected: usize,
        actual: usize,
    },
}

/// Dimensions of a block: `[time][stream][channel][polarization]`.
///
/// For spectra a stream is a beam; for snapshots it is a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockShape {
    pub ntime: usize,
    pub nstream: usize,
    pub nchan: usize,
    pub npol: usize,
}

impl BlockShape {
    pub fn new(ntime: usize, nstream: usize, nchan: usize, npol: usize) -> Self {
        Self {
            ntime,
            nstream,
            nchan,
            npol,
        }
    }

    pub fn len(&self) -> usize {
        self.ntime * self.nstream * self.nchan * self.npol
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dense block of `f32` samples in row-major `[time][stream][chan][pol]` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    shape: BlockShape,
    data: Vec<f32>,
}

impl Block {
    pub fn new(shape: BlockShape, data: Vec<f32>) -> Result<Self, BlockError> {
        if data.len() != shape.len() {
            return Err(BlockError::LengthMismatch {
                shape,
                expected: shape.len(),
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: BlockShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.len()],
        }
    }

    /// Build a block by evaluating `f(time, stream, chan, pol)` for every sample.
    pub fn from_fn(shape: BlockShape, mut f: impl FnMut(usize, usize, usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(shape.len());
        for t in 0..shape.ntime {
            for s in 0..shape.nstream {
                for c in 0..shape.nchan {
                    for p in 0..shape.npol {
                        data.push(f(t, s, c, p));
                    }
                }
            }
        }
        Self { shape, data }
    }

    pub fn shape(&self) -> BlockShape {
        self.shape
    }

    pub fn ntime(&self) -> usize {
        self.shape.ntime
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    fn index(&self, t: usize, s: usize, c: usize, p: usize) -> usize {
        let BlockShape {
            nstream,
            nchan,
            npol,
            ..
        } = self.shape;
        ((t * nstream + s) * nchan + c) * npol + p
    }

    pub fn get(&self, t: usize, s: usize, c: usize, p: usize) -> f32 {
        self.data[self.index(t, s, c, p)]
    }

    /// Gather one polarization of one stream for a range of time samples.
    ///
    /// Returns `times.len() * nchan` values, one channel vector per time.
    pub fn pol_rows(&self, times: std::ops::Range<usize>, stream: usize, pol: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(times.len() * self.shape.nchan);
        for t in times {
            for c in 0..self.shape.nchan {
                out.push(self.get(t, stream, c, pol));
            }
        }
        out
    }

    /// All streams, channels and polarizations at a single time sample.
    pub fn time_slice(&self, t: usize) -> &[f32] {
        let per_time = self.shape.nstream * self.shape.nchan * self.shape.npol;
        &self.data[t * per_time..(t + 1) * per_time]
    }
}
