//! External encoder child process
//!
//! Recording spills raw PCM into the standard input of a spawned `lame` or
//! `flac` process, which writes the timestamped output file itself. The
//! pipe's write end is non-blocking while the event loop runs and is flipped
//! to blocking exactly once, for the final flush at shutdown.

use crate::audio::CaptureRing;
use crate::fd::set_nonblocking;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::str::FromStr;

/// Target encoding, chosen explicitly or from the template suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Mp3,
    Flac,
}

impl Codec {
    /// Guess the codec from the filename template suffix.
    pub fn from_template(template: &str) -> Option<Self> {
        if template.ends_with(".mp3") {
            Some(Codec::Mp3)
        } else if template.ends_with(".flac") {
            Some(Codec::Flac)
        } else {
            None
        }
    }

    /// Environment variable overriding the encoder binary.
    pub fn binary_env_var(self) -> &'static str {
        match self {
            Codec::Mp3 => "LAME",
            Codec::Flac => "FLAC",
        }
    }

    /// Default encoder binary, resolved through the search path.
    pub fn default_binary(self) -> &'static str {
        match self {
            Codec::Mp3 => "lame",
            Codec::Flac => "flac",
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MP3" => Ok(Codec::Mp3),
            "FLAC" => Ok(Codec::Flac),
            _ => Err(format!("unsupported codec: {s}")),
        }
    }
}

/// Errors from the encoder lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("unsupported number of channels for MP3: {0}")]
    UnsupportedChannels(u16),

    #[error("unable to render filename template: {0}")]
    FilenameTemplate(String),

    #[error("failed to spawn encoder '{binary}': {source}")]
    Spawn {
        binary: String,
        source: io::Error,
    },

    #[error("encoder exited with {0}")]
    Exit(ExitStatus),

    #[error("encoder pipe error: {0}")]
    Io(#[from] io::Error),
}

/// Whether the child's stdin is still accepting data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStatus {
    Open,
    Closed,
}

/// Render the output filename from the strftime template at trigger time.
pub fn render_filename(template: &str) -> Result<String, EncoderError> {
    let mut out = String::new();
    // chrono surfaces bad directives as a fmt error while rendering
    write!(out, "{}", chrono::Local::now().format(template))
        .map_err(|_| EncoderError::FilenameTemplate(template.to_string()))?;
    Ok(out)
}

/// Build the encoder invocation for one output file.
pub fn encoder_command(
    codec: Codec,
    binary: &str,
    vbr: f32,
    channels: u16,
    rate: u32,
    outfile: &str,
) -> Result<Command, EncoderError> {
    let mut cmd = Command::new(binary);
    match codec {
        Codec::Mp3 => {
            let mode = match channels {
                1 => "m",
                2 => "s",
                n => return Err(EncoderError::UnsupportedChannels(n)),
            };
            cmd.arg("--silent")
                .arg("-V")
                .arg(vbr.to_string())
                .arg("-r")
                .arg("-m")
                .arg(mode)
                .arg("-s")
                .arg(format!("{}.{:03}", rate / 1000, rate % 1000))
                .arg("--signed")
                .arg("--bitwidth")
                .arg("16")
                .arg("--little-endian")
                .arg("-")
                .arg(outfile);
        }
        Codec::Flac => {
            cmd.arg("--silent")
                .arg("--force-raw-format")
                .arg(format!("--channels={channels}"))
                .arg(format!("--sample-rate={rate}"))
                .arg("--sign=signed")
                .arg("--bps=16")
                .arg("--endian=little")
                .arg("-o")
                .arg(outfile)
                .arg("-");
        }
    }
    Ok(cmd)
}

/// A running encoder child and the non-blocking write end of its pipe.
#[derive(Debug)]
pub struct EncoderSink {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl EncoderSink {
    /// Spawn the child with a piped stdin and mark the write end
    /// non-blocking.
    pub fn spawn(mut cmd: Command) -> Result<Self, EncoderError> {
        let binary = cmd.get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| EncoderError::Spawn { binary, source })?;
        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => return Err(EncoderError::Io(io::Error::other("encoder stdin unavailable"))),
        };
        set_nonblocking(stdin.as_raw_fd(), true)?;

        tracing::debug!("encoder pid: {}", child.id());
        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    /// Drain committed frames into the pipe, one non-blocking write per
    /// iteration, until the payload region is empty or the pipe is full.
    pub fn drain(&mut self, ring: &mut CaptureRing) -> Result<PipeStatus, EncoderError> {
        let stdin = match self.stdin.as_mut() {
            Some(stdin) => stdin,
            None => return Ok(PipeStatus::Closed),
        };
        loop {
            let payload = ring.payload();
            if payload.is_empty() {
                return Ok(PipeStatus::Open);
            }
            match stdin.write(payload) {
                Ok(0) => return Ok(PipeStatus::Closed),
                Ok(n) => {
                    tracing::trace!("wrote {} bytes to encoder", n);
                    ring.advance_consumer(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(PipeStatus::Open),
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(PipeStatus::Closed),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Whether the child has already exited (the pipe-hangup analogue).
    pub fn exited(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Flush the remaining payload in blocking mode, close the pipe and reap
    /// the child. A non-zero exit status is an error.
    pub fn finish(mut self, ring: &mut CaptureRing) -> Result<(), EncoderError> {
        if let Some(mut stdin) = self.stdin.take() {
            set_nonblocking(stdin.as_raw_fd(), false)?;
            loop {
                let payload = ring.payload();
                if payload.is_empty() {
                    break;
                }
                match stdin.write(payload) {
                    Ok(0) => break,
                    Ok(n) => ring.advance_consumer(n),
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break,
                    Err(e) => return Err(e.into()),
                }
            }
            // dropping the write end delivers EOF to the child
        }

        let status = self.child.wait()?;
        if !status.success() {
            return Err(EncoderError::Exit(status));
        }
        Ok(())
    }
}
