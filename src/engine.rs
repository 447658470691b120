//! Recording engine
//!
//! The single mutator of the recorder: it owns the ring buffer, detector,
//! measurement windows and encoder child, and multiplexes the four event
//! sources (capture chunks, the encoder pipe, the monitor ticker, and
//! termination signals) from one thread. The only suspension point is the
//! channel select; every drain inside an iteration is non-blocking.
//!
//! Handler order within one wake is fixed: signals, encoder drain, encoder
//! health, monitor tick, capture drain, then the state transitions. Frames
//! committed by a capture drain become drainable on the next wake.

use crate::audio::{CaptureRing, CaptureSource, SoundDetector};
use crate::config::Params;
use crate::encoder::{self, EncoderError, EncoderSink, PipeStatus};
use crate::monitor::{MeasurementSink, Monitor, MonitorError};
use crate::state::RecorderState;
use crossbeam_channel::{select, tick, Receiver, TryRecvError};

/// Fatal conditions that abort the recorder.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The capture side found no free space in the ring.
    #[error("buffer overrun")]
    BufferOverrun,

    #[error("capture stream failed")]
    CaptureFailed,

    #[error("capture source disconnected")]
    CaptureDisconnected,

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

enum Wake {
    Signal,
    Tick,
    Capture(Vec<i16>),
    CaptureClosed,
}

/// The recorder's owned state, threaded through the event loop.
pub struct Engine {
    params: Params,
    state: RecorderState,
    ring: CaptureRing,
    detector: SoundDetector,
    monitor: Monitor,
    encoder: Option<EncoderSink>,
    captured_frames: u64,
}

impl Engine {
    pub fn new(params: Params, sink: Option<MeasurementSink>) -> Self {
        let ring = CaptureRing::with_capacity(params.ring_frames, params.frame_bytes);
        let detector = SoundDetector::new(params.threshold_percent);
        let monitor = Monitor::new(
            params.channels as usize,
            params.rms_window,
            params.peak_window,
            params.monitor_period,
            sink,
        );
        Self {
            params,
            state: RecorderState::Uninitialized,
            ring,
            detector,
            monitor,
            encoder: None,
            captured_frames: 0,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Frames captured while not in the waiting state.
    pub fn captured_frames(&self) -> u64 {
        self.captured_frames
    }

    /// Run until the terminal state, then tear down. Teardown (flushing and
    /// reaping the encoder) runs on every exit path.
    pub fn run(&mut self, capture: &CaptureSource, signals: &Receiver<()>) -> Result<(), EngineError> {
        let ticker = tick(self.params.monitor_period);
        self.state = RecorderState::Waiting;
        tracing::info!("waiting");

        let result = self.event_loop(capture, signals, &ticker);

        tracing::debug!("stopping");
        self.state = RecorderState::Stopping;
        let teardown = match self.encoder.take() {
            Some(sink) => sink.finish(&mut self.ring).map_err(EngineError::from),
            None => Ok(()),
        };
        result.and(teardown)
    }

    fn event_loop(
        &mut self,
        capture: &CaptureSource,
        signals: &Receiver<()>,
        ticker: &Receiver<std::time::Instant>,
    ) -> Result<(), EngineError> {
        while self.state != RecorderState::Stopping {
            let wake = select! {
                recv(signals) -> msg => match msg {
                    Ok(()) => Wake::Signal,
                    Err(_) => Wake::Signal,
                },
                recv(ticker) -> _ => Wake::Tick,
                recv(capture.chunks()) -> msg => match msg {
                    Ok(chunk) => Wake::Capture(chunk),
                    Err(_) => Wake::CaptureClosed,
                },
            };

            if matches!(&wake, Wake::CaptureClosed) {
                return Err(EngineError::CaptureDisconnected);
            }

            // signals first: both INT and TERM request a graceful stop
            let mut signaled = matches!(&wake, Wake::Signal);
            while signals.try_recv().is_ok() {
                signaled = true;
            }
            if signaled {
                tracing::debug!("termination signal");
                self.state = RecorderState::Stopping;
            }

            // drain committed frames from previous wakes into the encoder
            if self.state.is_recording() {
                if let Some(enc) = self.encoder.as_mut() {
                    if self.ring.has_payload() {
                        if enc.drain(&mut self.ring)? == PipeStatus::Closed {
                            tracing::error!("encoder pipe closed prematurely");
                            self.state = RecorderState::Stopping;
                        }
                    }
                    if self.state.is_recording() {
                        if let Some(status) = enc.exited().map_err(EncoderError::from)? {
                            tracing::error!("encoder exited prematurely: {}", status);
                            self.state = RecorderState::Stopping;
                        }
                    }
                }
            }

            // monitor ticks; the tick channel coalesces, the monitor derives
            // the missed count from the inter-tick gap
            let mut ticks = usize::from(matches!(&wake, Wake::Tick));
            while ticker.try_recv().is_ok() {
                ticks += 1;
            }
            if ticks > 0 {
                self.monitor.on_tick(self.state, self.captured_frames)?;
            }

            // capture drain: the chunk that woke us, then whatever queued up
            if let Wake::Capture(chunk) = wake {
                self.ingest_chunk(&chunk)?;
            }
            loop {
                match capture.chunks().try_recv() {
                    Ok(chunk) => self.ingest_chunk(&chunk)?,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            if capture.failed() {
                return Err(EngineError::CaptureFailed);
            }
            if capture.overflowed() {
                return Err(EngineError::BufferOverrun);
            }

            self.evaluate_state()?;
        }
        Ok(())
    }

    /// Copy a capture chunk into the ring, feeding the detector and the
    /// measurement windows frame by frame and committing frames with sound.
    fn ingest_chunk(&mut self, samples: &[i16]) -> Result<(), EngineError> {
        let channels = self.params.channels as usize;
        let mut rest = samples;
        while !rest.is_empty() {
            let free = self.ring.contiguous_free();
            if free == 0 {
                return Err(EngineError::BufferOverrun);
            }
            let frames = (rest.len() / channels).min(free);
            if frames == 0 {
                break;
            }
            let take = &rest[..frames * channels];
            self.ring.write_frames(take);
            for (i, frame) in take.chunks_exact(channels).enumerate() {
                let silent = self.detector.observe_frame(frame);
                self.monitor.ingest_frame(frame);
                if !silent {
                    self.ring.mark_committed(i);
                }
            }
            if self.state != RecorderState::Waiting {
                self.captured_frames += frames as u64;
            }
            tracing::trace!("captured {} frames", frames);
            self.ring.advance_producer(frames);
            rest = &rest[frames * channels..];
        }
        Ok(())
    }

    /// Evaluate the state transitions after a capture drain.
    fn evaluate_state(&mut self) -> Result<(), EngineError> {
        if self.state == RecorderState::Waiting {
            if self.detector.heard_sound() {
                let filename = encoder::render_filename(&self.params.template)
                    .map_err(EngineError::from)?;
                tracing::info!("recording: {}", filename);
                let cmd = encoder::encoder_command(
                    self.params.codec,
                    &self.params.encoder_binary,
                    self.params.vbr,
                    self.params.channels,
                    self.params.rate,
                    &filename,
                )?;
                self.encoder = Some(EncoderSink::spawn(cmd)?);
                self.state = RecorderState::Recording;
            } else {
                self.ring.retain_latest(self.params.lead_in_frames);
            }
        }

        if self.state == RecorderState::Recording
            && self.detector.silent_frames() >= self.params.grace_frames / 2
        {
            self.state = RecorderState::RecordingSilence;
            tracing::info!(
                "silence detected: will stop in {:.2} seconds",
                self.params.grace_seconds / 2.0
            );
        }

        if self.state == RecorderState::RecordingSilence {
            if self.detector.silent_frames() == 0 {
                self.state = RecorderState::Recording;
                tracing::info!("resuming");
            } else if self.detector.silent_frames() >= self.params.grace_frames {
                tracing::info!("long silence detected");
                self.state = RecorderState::Stopping;
                self.ring.extend_committed(self.params.lead_out_frames);
            }
        }
        Ok(())
    }
}
