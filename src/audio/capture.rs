//! Audio capture using cpal
//!
//! Opens an input stream with the exact negotiated format (interleaved
//! signed 16-bit at the configured channel count and rate) and forwards
//! every callback buffer into a bounded chunk channel. The recording engine
//! drains that channel non-blockingly; the callback itself never blocks and
//! never allocates beyond the forwarded chunk.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Chunks the engine can fall behind by before capture overflows. At typical
/// callback sizes this is several seconds of audio.
const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// A capture stream feeding interleaved i16 chunks to the engine.
pub struct CaptureSource {
    _stream: Option<cpal::Stream>,
    chunks: Receiver<Vec<i16>>,
    overflow: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl CaptureSource {
    /// Open the named device (or the system default) and start capturing.
    #[allow(deprecated)] // cpal 0.17 deprecates name() but description() is not yet stable
    pub fn open(device_id: Option<&str>, channels: u16, rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_id {
            None | Some("default") => host
                .default_input_device()
                .ok_or_else(|| anyhow!("no default capture device available"))?,
            Some(id) => find_input_device(&host, id)
                .ok_or_else(|| anyhow!("capture device not found: {}", id))?,
        };

        let device_name = device_display_name(&device);
        tracing::info!(
            "capturing from '{}': {} Hz, {} channel(s), s16le",
            device_name,
            rate,
            channels
        );

        let config = cpal::StreamConfig {
            channels,
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = bounded::<Vec<i16>>(CHUNK_CHANNEL_CAPACITY);
        let overflow = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        let overflow_flag = overflow.clone();
        let failed_flag = failed.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if tx.try_send(data.to_vec()).is_err() {
                        // The engine stalled long enough to fill the channel;
                        // it reports this as a buffer overrun.
                        overflow_flag.store(true, Ordering::Relaxed);
                    }
                },
                move |err| {
                    tracing::error!("capture stream error: {}", err);
                    failed_flag.store(true, Ordering::Relaxed);
                },
                None,
            )
            .with_context(|| {
                format!(
                    "unsupported capture configuration on '{}': {} Hz, {} channel(s)",
                    device_name, rate, channels
                )
            })?;

        stream.play().context("failed to start capture stream")?;

        Ok(Self {
            _stream: Some(stream),
            chunks: rx,
            overflow,
            failed,
        })
    }

    /// A source fed by an arbitrary chunk producer instead of a device.
    /// The integration tests script capture scenarios through this.
    pub fn from_channel(chunks: Receiver<Vec<i16>>) -> Self {
        Self {
            _stream: None,
            chunks,
            overflow: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The channel the engine selects on.
    pub fn chunks(&self) -> &Receiver<Vec<i16>> {
        &self.chunks
    }

    /// Whether the callback had to drop a chunk.
    pub fn overflowed(&self) -> bool {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Whether the stream reported a fatal error.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Get the display name for a device.
///
/// Uses `description()` as the primary method (cpal 0.17+), with `name()` as
/// fallback for edge cases where description isn't available.
#[allow(deprecated)]
pub fn device_display_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|desc| desc.name().to_string())
        .unwrap_or_else(|_| device.name().unwrap_or_else(|_| "unknown".to_string()))
}

/// Find an input device whose stable id or display name matches `id`.
fn find_input_device(host: &cpal::Host, id: &str) -> Option<cpal::Device> {
    let devices = host.input_devices().ok()?;
    for device in devices {
        if let Ok(device_id) = device.id() {
            if device_id.to_string() == id {
                return Some(device);
            }
        }
        if device_display_name(&device) == id {
            return Some(device);
        }
    }
    None
}
