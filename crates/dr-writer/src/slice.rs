//! Per-block sample selection against a window's time-tag bounds.
//!
//! A block of N samples starting at `time_tag` with a fixed `step` covers the
//! tags `time_tag + i * step`. Only samples inside `[start, stop]` are kept.
//! The lead-in check runs first, then the flush-out check; a block that
//! straddles both bounds is therefore trimmed at the start only.

use std::ops::Range;

/// How a block relates to the window bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// The block begins before the window start.
    LeadIn,
    /// The block ends after the window stop.
    FlushOut,
    /// Every sample is inside the window.
    Contained,
}

/// The contiguous run of samples to write from one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSlice {
    pub kind: SliceKind,
    pub range: Range<usize>,
}

impl WriteSlice {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Time tag of every sample in a block.
pub fn sample_timestamps(time_tag: u64, step: u64, count: usize) -> Vec<u64> {
    (0..count as u64)
        .map(|i| time_tag.saturating_add(i.saturating_mul(step)))
        .collect()
}

/// Choose the samples of an ascending tag sequence that fall inside the window.
pub fn select_slice(tags: &[u64], start_tag: u64, stop_tag: u64) -> WriteSlice {
    let (Some(&first), Some(&last)) = (tags.first(), tags.last()) else {
        return WriteSlice {
            kind: SliceKind::Contained,
            range: 0..0,
        };
    };

    if first < start_tag {
        let offset = tags.partition_point(|&t| t < start_tag);
        WriteSlice {
            kind: SliceKind::LeadIn,
            range: offset..tags.len(),
        }
    } else if last > stop_tag {
        let offset = tags.partition_point(|&t| t <= stop_tag);
        WriteSlice {
            kind: SliceKind::FlushOut,
            range: 0..offset,
        }
    } else {
        WriteSlice {
            kind: SliceKind::Contained,
            range: 0..tags.len(),
        }
    }
}
