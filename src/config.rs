//! Recorder configuration
//!
//! `Options` mirrors the command line; `resolve()` validates it and converts
//! the second-based windows into frame counts against the configured sample
//! rate. Every check runs before any device or child process is touched.

use crate::encoder::Codec;
use std::time::Duration;

/// Raw options as parsed from the command line and environment.
#[derive(Debug, Clone)]
pub struct Options {
    /// Explicit codec; `None` means guess from the template suffix.
    pub codec: Option<Codec>,
    pub vbr: f32,
    /// Capture device identifier; `None` means the system default.
    pub device: Option<String>,
    pub channels: u16,
    pub rate: u32,
    pub buffer_seconds: f32,
    pub lead_in_seconds: f32,
    pub lead_out_seconds: f32,
    pub grace_seconds: f32,
    pub threshold_percent: f32,
    pub monitor_period_ms: u32,
    pub peak_seconds: f32,
    /// Already-open writable descriptor for measurement records.
    pub monitor_fd: Option<i32>,
    /// strftime template for the output filename.
    pub template: String,
    /// MP3 encoder binary (the `LAME` environment variable, if set).
    pub lame: String,
    /// FLAC encoder binary (the `FLAC` environment variable, if set).
    pub flac: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            codec: None,
            vbr: 4.0,
            device: None,
            channels: 2,
            rate: 44100,
            buffer_seconds: 15.0,
            lead_in_seconds: 0.2,
            lead_out_seconds: 0.2,
            grace_seconds: 10.0,
            threshold_percent: 1.0,
            monitor_period_ms: 100,
            peak_seconds: 3.0,
            monitor_fd: None,
            template: String::new(),
            lame: "lame".to_string(),
            flac: "flac".to_string(),
        }
    }
}

/// Configuration rejected before startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to guess codec from template: {0}")]
    UnknownCodec(String),

    #[error("buffer too small for a {what} of {seconds} seconds")]
    BufferTooSmall { what: &'static str, seconds: f32 },

    #[error("buffer of {0} seconds holds no frames")]
    EmptyBuffer(f32),

    #[error("monitor period must be positive")]
    ZeroMonitorPeriod,

    #[error("number of channels must be positive")]
    ZeroChannels,

    #[error("sampling frequency must be positive")]
    ZeroRate,

    #[error("unimplemented host endianness")]
    BigEndianHost,
}

/// Validated, frame-denominated parameters the engine runs on.
#[derive(Debug, Clone)]
pub struct Params {
    pub codec: Codec,
    pub encoder_binary: String,
    pub vbr: f32,
    pub device: Option<String>,
    pub channels: u16,
    pub rate: u32,
    pub template: String,
    /// Ring capacity in frames.
    pub ring_frames: usize,
    pub frame_bytes: usize,
    pub lead_in_frames: usize,
    pub lead_out_frames: usize,
    pub grace_frames: u64,
    pub grace_seconds: f32,
    pub threshold_percent: f32,
    pub monitor_period: Duration,
    pub rms_window: usize,
    pub peak_window: usize,
    pub monitor_fd: Option<i32>,
}

impl Options {
    /// Validate and convert into engine parameters.
    pub fn resolve(self) -> Result<Params, ConfigError> {
        if cfg!(target_endian = "big") {
            return Err(ConfigError::BigEndianHost);
        }
        if self.channels == 0 {
            return Err(ConfigError::ZeroChannels);
        }
        if self.rate == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if self.monitor_period_ms == 0 {
            return Err(ConfigError::ZeroMonitorPeriod);
        }

        let codec = match self.codec {
            Some(codec) => codec,
            None => Codec::from_template(&self.template)
                .ok_or_else(|| ConfigError::UnknownCodec(self.template.clone()))?,
        };
        let encoder_binary = match codec {
            Codec::Mp3 => self.lame.clone(),
            Codec::Flac => self.flac.clone(),
        };

        let frames_of = |seconds: f32| (seconds * self.rate as f32) as usize;

        let ring_frames = frames_of(self.buffer_seconds);
        if ring_frames == 0 {
            return Err(ConfigError::EmptyBuffer(self.buffer_seconds));
        }

        let lead_in_frames = frames_of(self.lead_in_seconds);
        let lead_out_frames = frames_of(self.lead_out_seconds);
        let grace_frames = frames_of(self.grace_seconds);
        let peak_window = frames_of(self.peak_seconds).max(1);
        let rms_window =
            (self.monitor_period_ms as u64 * self.rate as u64 / 1000).max(1) as usize;

        let window_checks: [(&'static str, usize, f32); 5] = [
            ("lead in", lead_in_frames, self.lead_in_seconds),
            ("lead out", lead_out_frames, self.lead_out_seconds),
            ("grace period", grace_frames, self.grace_seconds),
            ("peak window", peak_window, self.peak_seconds),
            (
                "RMS window",
                rms_window,
                self.monitor_period_ms as f32 / 1000.0,
            ),
        ];
        for (what, frames, seconds) in window_checks {
            if frames > ring_frames {
                return Err(ConfigError::BufferTooSmall { what, seconds });
            }
        }

        Ok(Params {
            codec,
            encoder_binary,
            vbr: self.vbr,
            device: self.device,
            channels: self.channels,
            rate: self.rate,
            template: self.template,
            ring_frames,
            frame_bytes: 2 * self.channels as usize,
            lead_in_frames,
            lead_out_frames,
            grace_frames: grace_frames as u64,
            grace_seconds: self.grace_seconds,
            threshold_percent: self.threshold_percent,
            monitor_period: Duration::from_millis(self.monitor_period_ms as u64),
            rms_window,
            peak_window,
            monitor_fd: self.monitor_fd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(template: &str) -> Options {
        Options {
            template: template.to_string(),
            ..Options::default()
        }
    }

    #[test]
    fn defaults_resolve_for_an_mp3_template() {
        let params = options("journal-%F.mp3").resolve().unwrap();
        assert_eq!(params.codec, Codec::Mp3);
        assert_eq!(params.encoder_binary, "lame");
        assert_eq!(params.channels, 2);
        assert_eq!(params.frame_bytes, 4);
        assert_eq!(params.ring_frames, 15 * 44100);
        assert_eq!(params.lead_in_frames, (0.2 * 44100.0) as usize);
        assert_eq!(params.grace_frames, 10 * 44100);
        assert_eq!(params.rms_window, 4410);
        assert_eq!(params.peak_window, 3 * 44100);
    }

    #[test]
    fn explicit_codec_overrides_suffix() {
        let mut opts = options("capture.raw");
        opts.codec = Some(Codec::Flac);
        opts.flac = "/opt/flac".to_string();
        let params = opts.resolve().unwrap();
        assert_eq!(params.codec, Codec::Flac);
        assert_eq!(params.encoder_binary, "/opt/flac");
    }

    #[test]
    fn unguessable_codec_is_rejected() {
        let err = options("capture.raw").resolve().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCodec(_)));
    }

    #[test]
    fn lead_in_longer_than_buffer_is_rejected() {
        let mut opts = options("t.mp3");
        opts.buffer_seconds = 10.0;
        opts.lead_in_seconds = 20.0;
        let err = opts.resolve().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BufferTooSmall { what: "lead in", .. }
        ));
    }

    #[test]
    fn grace_longer_than_buffer_is_rejected() {
        let mut opts = options("t.flac");
        opts.buffer_seconds = 5.0;
        opts.grace_seconds = 30.0;
        let err = opts.resolve().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BufferTooSmall {
                what: "grace period",
                ..
            }
        ));
    }

    #[test]
    fn zero_monitor_period_is_rejected() {
        let mut opts = options("t.mp3");
        opts.monitor_period_ms = 0;
        assert!(matches!(
            opts.resolve().unwrap_err(),
            ConfigError::ZeroMonitorPeriod
        ));
    }

    #[test]
    fn zero_channels_and_rate_are_rejected() {
        let mut opts = options("t.mp3");
        opts.channels = 0;
        assert!(matches!(opts.resolve().unwrap_err(), ConfigError::ZeroChannels));

        let mut opts = options("t.mp3");
        opts.rate = 0;
        assert!(matches!(opts.resolve().unwrap_err(), ConfigError::ZeroRate));
    }
}
