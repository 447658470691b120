//! Periodic audio measurements
//!
//! Drives the per-channel RMS/peak windows and, on every monitor tick,
//! emits one fixed-width record to an optional measurement descriptor:
//!
//! ```text
//! byte  0         state
//! bytes 1..=8     captured frames, u64 host-endian
//! bytes 9..       per-channel RMS as u16, then per-channel peak as u16
//! ```
//!
//! The record must leave in a single send; a would-block sink drops the
//! record with a warning, a short write is fatal.

use crate::audio::{metering::ChannelMeter, SAMPLE_MAX};
use crate::fd::set_nonblocking;
use crate::state::RecorderState;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::time::{Duration, Instant};

/// Errors from the measurement path.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The sink accepted only part of a record; consumers cannot resync.
    #[error("short measurement write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("measurement sink error: {0}")]
    Io(#[from] io::Error),
}

/// An already-open writable descriptor handed over on the command line.
pub struct MeasurementSink {
    file: File,
}

impl MeasurementSink {
    /// Take ownership of `fd` and switch it to non-blocking mode.
    pub fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        set_nonblocking(fd, true)?;
        // Safety: the caller hands over ownership of an open descriptor.
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Self { file })
    }

    /// Send one record. A full pipe drops the record; a partial write is an
    /// error because the stream is a sequence of fixed-width records.
    fn send(&mut self, record: &[u8]) -> Result<(), MonitorError> {
        match self.file.write(record) {
            Ok(n) if n == record.len() => Ok(()),
            Ok(n) => Err(MonitorError::ShortWrite {
                written: n,
                expected: record.len(),
            }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::warn!("dropped monitoring message");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Sliding-window measurements for every capture channel plus the tick
/// bookkeeping around their emission.
pub struct Monitor {
    meters: Vec<ChannelMeter>,
    period: Duration,
    sink: Option<MeasurementSink>,
    last_tick: Option<Instant>,
}

impl Monitor {
    pub fn new(
        channels: usize,
        rms_window: usize,
        peak_window: usize,
        period: Duration,
        sink: Option<MeasurementSink>,
    ) -> Self {
        Self {
            meters: (0..channels)
                .map(|_| ChannelMeter::new(rms_window, peak_window))
                .collect(),
            period,
            sink,
            last_tick: None,
        }
    }

    /// Feed one interleaved frame into every channel's windows.
    pub fn ingest_frame(&mut self, frame: &[i16]) {
        for (meter, &s) in self.meters.iter_mut().zip(frame) {
            meter.push(s);
        }
    }

    /// The packed record for the current window contents.
    pub fn record(&self, state: RecorderState, captured_frames: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 8 + 4 * self.meters.len());
        out.push(state.wire_code());
        out.extend_from_slice(&captured_frames.to_ne_bytes());
        for meter in &self.meters {
            out.extend_from_slice(&(meter.rms().round() as u16).to_ne_bytes());
        }
        for meter in &self.meters {
            out.extend_from_slice(&meter.peak().to_ne_bytes());
        }
        out
    }

    /// Handle a monitor timer tick: detect missed periods, trace levels,
    /// and push one record to the sink if one is configured.
    pub fn on_tick(
        &mut self,
        state: RecorderState,
        captured_frames: u64,
    ) -> Result<(), MonitorError> {
        let now = Instant::now();
        if let Some(prev) = self.last_tick {
            let periods = ((now - prev).as_secs_f64() / self.period.as_secs_f64()).round() as u64;
            if periods > 1 {
                tracing::warn!("missed monitor ticks: {}", periods - 1);
            }
        }
        self.last_tick = Some(now);

        for (i, meter) in self.meters.iter().enumerate() {
            tracing::trace!(
                "channel {}: RMS%={:.2} peak%={:.2}",
                i,
                100.0 * meter.rms() / SAMPLE_MAX as f64,
                100.0 * meter.peak() as f64 / SAMPLE_MAX as f64
            );
        }

        if self.sink.is_some() {
            let record = self.record(state, captured_frames);
            if let Some(sink) = self.sink.as_mut() {
                sink.send(&record)?;
            }
        }
        Ok(())
    }
}
