//! CLI Module
//!
//! Command-line interface for Echoform.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::OutputBackend;
use crate::dsp::EffectParameters;

/// Echoform - variable-speed playback, echo and reverb, trim and export
#[derive(Parser, Debug)]
#[command(name = "echoform")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// ffmpeg executable used for export
    #[arg(long, global = true, env = "ECHOFORM_FFMPEG")]
    pub ffmpeg: Option<PathBuf>,

    /// Output device used for playback
    #[arg(long, global = true, value_enum, env = "ECHOFORM_BACKEND")]
    pub backend: Option<OutputBackend>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a file and print a summary
    #[command(name = "info")]
    Info {
        /// Input audio file
        input: PathBuf,
    },

    /// Render a trimmed range through echo and reverb and export it
    #[command(name = "export")]
    Export {
        /// Input audio file
        input: PathBuf,

        /// Playback rate the range is rendered at (0.5-3.0)
        #[arg(short, long)]
        rate: Option<f64>,

        #[command(flatten)]
        effects: EffectArgs,

        /// Directory to write the exported file into
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Play a file to the end
    #[command(name = "play")]
    Play {
        /// Input audio file
        input: PathBuf,

        /// Playback rate (0.5-3.0)
        #[arg(short, long)]
        rate: Option<f64>,
    },

    /// Line-driven editing session
    #[command(name = "interactive")]
    Interactive {
        /// File to load at start
        input: Option<PathBuf>,
    },
}

/// Effect and trim overrides
#[derive(Args, Debug, Clone, Default)]
pub struct EffectArgs {
    /// Echo delay in seconds (0-1)
    #[arg(long)]
    pub echo_delay: Option<f64>,

    /// Echo feedback (0-1)
    #[arg(long)]
    pub echo_feedback: Option<f64>,

    /// Reverb decay in seconds (0 disables the reverb)
    #[arg(long)]
    pub reverb_decay: Option<f64>,

    /// Reverb pre-delay in seconds (0-0.5)
    #[arg(long)]
    pub reverb_pre_delay: Option<f64>,

    /// Trim start in seconds
    #[arg(long)]
    pub trim_start: Option<f64>,

    /// Trim end in seconds
    #[arg(long)]
    pub trim_end: Option<f64>,
}

impl EffectArgs {
    /// Apply the given overrides on top of `params`
    pub fn apply(&self, params: EffectParameters) -> EffectParameters {
        EffectParameters {
            echo_delay: self.echo_delay.unwrap_or(params.echo_delay),
            echo_feedback: self.echo_feedback.unwrap_or(params.echo_feedback),
            reverb_decay: self.reverb_decay.unwrap_or(params.reverb_decay),
            reverb_pre_delay: self.reverb_pre_delay.unwrap_or(params.reverb_pre_delay),
            trim: crate::dsp::TrimRange {
                start: self.trim_start.unwrap_or(params.trim.start),
                end: self.trim_end.unwrap_or(params.trim.end),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export() {
        let cli = Cli::try_parse_from([
            "echoform",
            "export",
            "in.wav",
            "--rate",
            "1.5",
            "--echo-delay",
            "0.3",
            "--trim-start",
            "2",
            "--trim-end",
            "6",
            "--out-dir",
            "out",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Export {
                input,
                rate,
                effects,
                out_dir,
            }) => {
                assert_eq!(input, PathBuf::from("in.wav"));
                assert_eq!(rate, Some(1.5));
                assert_eq!(effects.echo_delay, Some(0.3));
                assert_eq!(out_dir, Some(PathBuf::from("out")));

                let params = effects.apply(EffectParameters::default());
                assert_eq!(params.trim.start, 2.0);
                assert_eq!(params.trim.end, 6.0);
                assert_eq!(params.echo_feedback, 0.5);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "echoform",
            "info",
            "a.mp3",
            "--verbose",
            "--ffmpeg",
            "/opt/ffmpeg",
            "--backend",
            "headless",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.ffmpeg, Some(PathBuf::from("/opt/ffmpeg")));
        assert_eq!(cli.backend, Some(OutputBackend::Headless));
    }
}
