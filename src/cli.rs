//! Command line surface for the recorder
//!
//! Short flags follow the traditional single-letter layout; `-V` is the MP3
//! VBR quality, so clap's automatic version flag is disabled.

use crate::config::Options;
use crate::encoder::Codec;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "earshot",
    about = "Wait for sound and record it into an MP3 or FLAC file",
    disable_version_flag = true
)]
pub struct Cli {
    /// Set number of channels to record
    #[arg(short = 'c', value_name = "CHANNELS", default_value_t = 2)]
    pub channels: u16,

    /// Encode using CODEC (MP3 or FLAC); guessed from the template suffix
    /// when omitted
    #[arg(short = 'C', value_name = "CODEC", value_parser = parse_codec)]
    pub codec: Option<Codec>,

    /// Set desired VBR quality when using the MP3 codec
    #[arg(short = 'V', value_name = "QUALITY", default_value_t = 4.0, value_parser = parse_vbr)]
    pub vbr: f32,

    /// Capture device to record from
    #[arg(short = 'd', value_name = "DEVICE")]
    pub device: Option<String>,

    /// Send and log audio measurements every MS milliseconds
    #[arg(short = 'm', value_name = "MS", default_value_t = 100)]
    pub monitor_period_ms: u32,

    /// Send audio measurements and metadata to FD
    #[arg(short = 'M', value_name = "FD")]
    pub monitor_fd: Option<i32>,

    /// Stop after detecting SEC seconds of silence
    #[arg(short = 's', value_name = "SEC", default_value_t = 10.0, value_parser = parse_seconds)]
    pub grace_seconds: f32,

    /// Add SEC of sound leading in to the sound threshold trigger
    #[arg(short = 'l', value_name = "SEC", default_value_t = 0.2, value_parser = parse_seconds)]
    pub lead_in_seconds: f32,

    /// Add SEC of sound leading out from the silence threshold trigger
    #[arg(short = 'L', value_name = "SEC", default_value_t = 0.2, value_parser = parse_seconds)]
    pub lead_out_seconds: f32,

    /// Buffer SEC seconds of sound
    #[arg(short = 'B', value_name = "SEC", default_value_t = 15.0, value_parser = parse_seconds)]
    pub buffer_seconds: f32,

    /// Consider a sample value below PERCENT percent of maximum as silence
    #[arg(short = 't', value_name = "PERCENT", default_value_t = 1.0, value_parser = parse_percent)]
    pub threshold_percent: f32,

    /// Sampling frequency
    #[arg(short = 'r', value_name = "HZ", default_value_t = 44100)]
    pub rate: u32,

    /// strftime template for the output filename, rendered at trigger time
    #[arg(value_name = "FILENAME_TEMPLATE")]
    pub template: String,
}

fn parse_codec(s: &str) -> Result<Codec, String> {
    s.parse()
}

fn parse_vbr(s: &str) -> Result<f32, String> {
    let v: f32 = s
        .parse()
        .map_err(|_| format!("unable to parse as VBR quality: {s}"))?;
    if (0.0..=10.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("VBR quality out of range (0.0-10.0): {s}"))
    }
}

fn parse_seconds(s: &str) -> Result<f32, String> {
    let v: f32 = s
        .parse()
        .map_err(|_| format!("unable to parse as non-negative seconds: {s}"))?;
    if v >= 0.0 {
        Ok(v)
    } else {
        Err(format!("unable to parse as non-negative seconds: {s}"))
    }
}

fn parse_percent(s: &str) -> Result<f32, String> {
    let v: f32 = s
        .parse()
        .map_err(|_| format!("unable to parse as percent: {s}"))?;
    if (0.0..=100.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("unable to parse as percent: {s}"))
    }
}

impl Cli {
    /// Fold in the environment (encoder binary overrides) and produce the
    /// raw option set.
    pub fn into_options(self) -> Options {
        Options {
            codec: self.codec,
            vbr: self.vbr,
            device: self.device,
            channels: self.channels,
            rate: self.rate,
            buffer_seconds: self.buffer_seconds,
            lead_in_seconds: self.lead_in_seconds,
            lead_out_seconds: self.lead_out_seconds,
            grace_seconds: self.grace_seconds,
            threshold_percent: self.threshold_percent,
            monitor_period_ms: self.monitor_period_ms,
            peak_seconds: 3.0,
            monitor_fd: self.monitor_fd,
            template: self.template,
            lame: std::env::var("LAME").unwrap_or_else(|_| "lame".to_string()),
            flac: std::env::var("FLAC").unwrap_or_else(|_| "flac".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_usage_text() {
        let cli = Cli::try_parse_from(["earshot", "journal-%F.mp3"]).unwrap();
        assert_eq!(cli.channels, 2);
        assert_eq!(cli.rate, 44100);
        assert_eq!(cli.vbr, 4.0);
        assert_eq!(cli.buffer_seconds, 15.0);
        assert_eq!(cli.grace_seconds, 10.0);
        assert_eq!(cli.threshold_percent, 1.0);
        assert_eq!(cli.monitor_period_ms, 100);
        assert_eq!(cli.monitor_fd, None);
        assert_eq!(cli.template, "journal-%F.mp3");
    }

    #[test]
    fn all_flags_parse() {
        let cli = Cli::try_parse_from([
            "earshot", "-c", "1", "-C", "FLAC", "-V", "2.5", "-d", "pulse:3", "-m", "250", "-M",
            "5", "-s", "4", "-l", "0.5", "-L", "0.5", "-B", "30", "-t", "2.5", "-r", "48000",
            "out-%s.flac",
        ])
        .unwrap();
        assert_eq!(cli.channels, 1);
        assert_eq!(cli.codec, Some(Codec::Flac));
        assert_eq!(cli.device.as_deref(), Some("pulse:3"));
        assert_eq!(cli.monitor_fd, Some(5));
        assert_eq!(cli.rate, 48000);
    }

    #[test]
    fn template_is_required() {
        assert!(Cli::try_parse_from(["earshot"]).is_err());
    }

    #[test]
    fn vbr_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["earshot", "-V", "11", "t.mp3"]).is_err());
        assert!(Cli::try_parse_from(["earshot", "-V", "-1", "t.mp3"]).is_err());
    }

    #[test]
    fn negative_values_are_rejected() {
        assert!(Cli::try_parse_from(["earshot", "-m", "-100", "t.mp3"]).is_err());
        assert!(Cli::try_parse_from(["earshot", "-s", "-1", "t.mp3"]).is_err());
        assert!(Cli::try_parse_from(["earshot", "-t", "101", "t.mp3"]).is_err());
    }

    #[test]
    fn unknown_codec_is_rejected() {
        assert!(Cli::try_parse_from(["earshot", "-C", "OGG", "t.ogg"]).is_err());
    }
}
