//! Time-tag arithmetic.
//!
//! A time tag counts ticks of the base sample clock since the Unix epoch.
//! Spectrometer channels are `TICKS_PER_CHANNEL` ticks wide, so one
//! integration of `navg` spectra spans `navg * TICKS_PER_CHANNEL` ticks.

use chrono::{DateTime, Utc};

/// Base sample rate in Hz.
pub const FS: u64 = 196_000_000;

/// Ticks per spectrometer channel (FFT length).
pub const TICKS_PER_CHANNEL: u64 = 8192;

/// Spectrometer channel bandwidth in Hz.
pub const CHAN_BW: f64 = FS as f64 / TICKS_PER_CHANNEL as f64;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Convert a UTC instant to a time tag. Instants before the epoch clamp to 0.
pub fn datetime_to_timetag(dt: DateTime<Utc>) -> u64 {
    let secs = dt.timestamp();
    if secs < 0 {
        return 0;
    }
    let nanos = dt.timestamp_subsec_nanos() as u64;
    secs as u64 * FS + nanos * FS / NANOS_PER_SEC
}

/// Convert a time tag back to a UTC instant (nanosecond resolution).
pub fn timetag_to_datetime(time_tag: u64) -> DateTime<Utc> {
    let secs = time_tag / FS;
    let nanos = (time_tag % FS) * NANOS_PER_SEC / FS;
    DateTime::from_timestamp(secs as i64, nanos as u32).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Sky frequency in Hz of a spectrometer channel number.
pub fn chan_to_freq(chan: u32) -> f64 {
    chan as f64 * CHAN_BW
}
