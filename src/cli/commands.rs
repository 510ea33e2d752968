//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info};

use super::{Cli, EffectArgs};
use crate::config::EditorConfig;
use crate::editor::EditorSession;
use crate::engine::buffer::{calculate_peak, calculate_rms};
use crate::engine::FileLoader;
use crate::error::{EditorError, Result};
use crate::export::ExportReport;

/// Load the configuration named on the command line and apply overrides
pub fn build_config(cli: &Cli) -> Result<EditorConfig> {
    let mut config = EditorConfig::load(cli.config.as_deref())?;
    if let Some(ffmpeg) = &cli.ffmpeg {
        config.transcoder.program = ffmpeg.clone();
    }
    if let Some(backend) = cli.backend {
        config.output.backend = backend;
    }
    config.validate()?;
    Ok(config)
}

/// Format seconds as m:ss.mmm
pub fn format_time(secs: f64) -> String {
    let secs = secs.max(0.0);
    let minutes = (secs / 60.0).floor();
    format!("{}:{:06.3}", minutes as u64, secs - minutes * 60.0)
}

/// Print an error the way a user should see it
pub fn report_error(err: &EditorError) {
    if err.is_user_facing() {
        eprintln!("{}", err.friendly_message());
    } else {
        eprintln!("Error: {}", err);
    }
    for suggestion in err.recovery_suggestions() {
        eprintln!("  - {}", suggestion);
    }
}

fn print_report(report: &ExportReport) {
    println!("Exported: {}", report.path.display());
    println!("  Size: {} bytes", report.size_bytes);
    println!("  SHA-256: {}", report.sha256);
    println!(
        "  Range: {} - {} at {}x ({} of audio)",
        format_time(report.window.start),
        format_time(report.window.end),
        report.rate,
        format_time(report.duration_secs)
    );
}

/// Decode a file and print a summary.
pub async fn info(input: &Path) -> Result<()> {
    info!("Reading: {}", input.display());

    let asset = FileLoader::new()
        .load(Some(input))
        .await?
        .ok_or_else(|| EditorError::MissingInput {
            what: input.display().to_string(),
        })?;

    println!("File: {}", input.display());
    println!("Channels: {}", asset.channels());
    println!("Sample rate: {} Hz", asset.sample_rate);
    println!("Duration: {}", format_time(asset.duration_secs()));
    println!("Peak: {:.1} dBFS", calculate_peak(&asset));
    println!("RMS: {:.1} dBFS", calculate_rms(&asset));

    Ok(())
}

/// Render a trimmed range with effects and export it.
pub async fn export(
    config: EditorConfig,
    input: &Path,
    rate: Option<f64>,
    effects: &EffectArgs,
    out_dir: Option<&Path>,
) -> Result<()> {
    let mut session = EditorSession::new(config)?;
    let result = export_with(&session, input, rate, effects, out_dir).await;
    session.teardown().await;

    let report = result?;
    print_report(&report);
    Ok(())
}

async fn export_with(
    session: &EditorSession,
    input: &Path,
    rate: Option<f64>,
    effects: &EffectArgs,
    out_dir: Option<&Path>,
) -> Result<ExportReport> {
    session
        .load_file(Some(input))
        .await?
        .ok_or_else(|| EditorError::MissingInput {
            what: input.display().to_string(),
        })?;

    session.update_params(|p| effects.apply(p));
    if let Some(rate) = rate {
        session.set_rate(rate);
    }

    info!("Waiting for the transcoder");
    session.transcoder().ready().await?;

    session
        .export(out_dir)
        .await?
        .ok_or_else(|| EditorError::MissingInput {
            what: "loaded audio".to_string(),
        })
}

/// Play a file to the end, printing the position. Ctrl-C pauses and exits.
pub async fn play(config: EditorConfig, input: &Path, rate: Option<f64>) -> Result<()> {
    let mut session = EditorSession::new(config)?;
    let result = play_with(&session, input, rate).await;
    session.teardown().await;
    result
}

async fn play_with(session: &EditorSession, input: &Path, rate: Option<f64>) -> Result<()> {
    let asset = session
        .load_file(Some(input))
        .await?
        .ok_or_else(|| EditorError::MissingInput {
            what: input.display().to_string(),
        })?;
    if let Some(rate) = rate {
        session.set_rate(rate);
    }

    let duration = format_time(asset.duration_secs());
    let mut position = session.playback().subscribe();
    if !session.play() {
        return Err(EditorError::OutputDevice {
            reason: "playback did not start".to_string(),
        });
    }
    println!("Playing {} at {}x", input.display(), session.rate());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                session.pause();
                println!("\nPaused at {}", format_time(session.elapsed()));
                break;
            }
            changed = position.changed() => {
                if changed.is_err() || !session.playback().is_playing() {
                    println!("\nFinished");
                    break;
                }
                let now = *position.borrow_and_update();
                print!("\r{} / {}", format_time(now), duration);
                let _ = std::io::stdout().flush();
            }
        }
    }

    Ok(())
}

// ============================================================================
// Interactive mode
// ============================================================================

/// A line command in interactive mode
#[derive(Debug, Clone, PartialEq)]
pub enum InteractiveCommand {
    Load(PathBuf),
    Play,
    Pause,
    Rate(f64),
    Echo { delay: f64, feedback: f64 },
    Reverb { decay: f64, pre_delay: f64 },
    Trim { start: f64, end: f64 },
    Export(Option<PathBuf>),
    Status,
    Help,
    Quit,
}

const HELP: &str = "\
Commands:
  load <file>                  load an audio file
  play | pause                 start or stop playback
  rate <0.5-3.0>               set the playback rate
  echo <delay> <feedback>      echo delay (s) and feedback
  reverb <decay> <pre-delay>   reverb decay (s) and pre-delay (s)
  trim <start> <end>           range to export (s)
  export [dir]                 render and export
  status                       show the session state
  quit";

fn parse_number(word: Option<&str>, what: &str) -> std::result::Result<f64, String> {
    let word = word.ok_or_else(|| format!("missing {}", what))?;
    word.parse::<f64>()
        .map_err(|_| format!("'{}' is not a number ({})", word, what))
}

/// Parse one line of interactive input
pub fn parse_command(line: &str) -> std::result::Result<InteractiveCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "load" | "open" => {
            let rest: Vec<&str> = words.by_ref().collect();
            if rest.is_empty() {
                return Err("missing file".to_string());
            }
            InteractiveCommand::Load(PathBuf::from(rest.join(" ")))
        }
        "play" => InteractiveCommand::Play,
        "pause" | "stop" => InteractiveCommand::Pause,
        "rate" | "speed" => InteractiveCommand::Rate(parse_number(words.next(), "rate")?),
        "echo" => InteractiveCommand::Echo {
            delay: parse_number(words.next(), "echo delay")?,
            feedback: parse_number(words.next(), "echo feedback")?,
        },
        "reverb" => InteractiveCommand::Reverb {
            decay: parse_number(words.next(), "reverb decay")?,
            pre_delay: parse_number(words.next(), "reverb pre-delay")?,
        },
        "trim" => InteractiveCommand::Trim {
            start: parse_number(words.next(), "trim start")?,
            end: parse_number(words.next(), "trim end")?,
        },
        "export" | "download" => InteractiveCommand::Export(words.next().map(PathBuf::from)),
        "status" => InteractiveCommand::Status,
        "help" | "?" => InteractiveCommand::Help,
        "quit" | "exit" | "q" => InteractiveCommand::Quit,
        other => return Err(format!("unknown command '{}'", other)),
    };

    Ok(command)
}

fn print_status(session: &EditorSession) {
    let status = session.status();
    match status.duration {
        Some(duration) => println!(
            "{} {} / {} ({} ch, {} Hz)",
            status.state,
            format_time(status.elapsed),
            format_time(duration),
            status.channels.unwrap_or(0),
            status.sample_rate.unwrap_or(0)
        ),
        None => println!("No file loaded"),
    }
    println!("Rate: {}x", status.rate);
    println!(
        "Echo: {}s / {}  Reverb: {}s / {}s",
        status.params.echo_delay,
        status.params.echo_feedback,
        status.params.reverb_decay,
        status.params.reverb_pre_delay
    );
    println!(
        "Trim: {} - {}",
        format_time(status.params.trim.start),
        format_time(status.params.trim.end)
    );
    println!("Transcoder: {:?}", status.transcoder);
}

/// Run one interactive command; returns false when the session should end
async fn execute(session: &EditorSession, command: InteractiveCommand) -> Result<bool> {
    match command {
        InteractiveCommand::Load(path) => {
            if let Some(asset) = session.load_file(Some(path.as_path())).await? {
                println!(
                    "Loaded {} ({}, {} ch)",
                    path.display(),
                    format_time(asset.duration_secs()),
                    asset.channels()
                );
            }
        }
        InteractiveCommand::Play => {
            if !session.play() {
                println!("Nothing to play");
            }
        }
        InteractiveCommand::Pause => {
            if session.pause() {
                println!("Paused at {}", format_time(session.elapsed()));
            }
        }
        InteractiveCommand::Rate(rate) => {
            println!("Rate: {}x", session.set_rate(rate));
        }
        InteractiveCommand::Echo { delay, feedback } => {
            session.update_params(|p| p.with_echo(delay, feedback));
        }
        InteractiveCommand::Reverb { decay, pre_delay } => {
            session.update_params(|p| p.with_reverb(decay, pre_delay));
        }
        InteractiveCommand::Trim { start, end } => {
            session.update_params(|p| p.with_trim(start, end));
        }
        InteractiveCommand::Export(dir) => {
            if !session.transcoder().is_ready() {
                println!("The encoder is still loading");
                return Ok(true);
            }
            match session.export(dir.as_deref()).await? {
                Some(report) => print_report(&report),
                None => println!("Nothing to export"),
            }
        }
        InteractiveCommand::Status => print_status(session),
        InteractiveCommand::Help => println!("{}", HELP),
        InteractiveCommand::Quit => return Ok(false),
    }
    Ok(true)
}

/// Line-driven editing session on stdin.
pub async fn interactive(config: EditorConfig, input: Option<&Path>) -> Result<()> {
    let mut session = EditorSession::new(config)?;
    if let Some(input) = input {
        if let Err(e) = execute(&session, InteractiveCommand::Load(input.to_path_buf())).await {
            report_error(&e);
        }
    }
    println!("Type 'help' for commands");

    run_commands(&session, BufReader::new(tokio::io::stdin())).await;

    session.teardown().await;
    Ok(())
}

/// Execute commands line by line until `quit`, end of input, or a read error
async fn run_commands<R>(session: &EditorSession, reader: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                let err = EditorError::from(e);
                error!("Reading commands failed: {}", err);
                report_error(&err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match execute(session, command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                // Keep the session alive after any failure
                error!("{} failed: {}", line.trim(), e);
                report_error(&e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputBackend;
    use crate::engine::{AudioContext, HeadlessDevice};
    use crate::export::{FfmpegTranscoder, TranscoderHandle};
    use std::sync::Arc;

    fn session() -> EditorSession {
        let context =
            AudioContext::with_device(Box::new(HeadlessDevice::new(8000, 2, 256))).unwrap();
        let transcoder = TranscoderHandle::ready_now(Arc::new(FfmpegTranscoder::new()));
        EditorSession::with_parts(EditorConfig::default(), context, transcoder)
    }

    #[tokio::test]
    async fn test_commands_run_until_quit() {
        let session = session();
        run_commands(&session, &b"rate 1.5\n\nbogus\nquit\nrate 3\n"[..]).await;
        assert_eq!(session.rate(), 1.5);
    }

    #[tokio::test]
    async fn test_unreadable_input_ends_commands() {
        let session = session();
        run_commands(&session, &b"rate 2\n\xff\xfe\nrate 1\n"[..]).await;
        assert_eq!(session.rate(), 2.0);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("play"), Ok(InteractiveCommand::Play));
        assert_eq!(parse_command("  RATE 1.5 "), Ok(InteractiveCommand::Rate(1.5)));
        assert_eq!(
            parse_command("trim 2 6"),
            Ok(InteractiveCommand::Trim { start: 2.0, end: 6.0 })
        );
        assert_eq!(
            parse_command("load My Song.wav"),
            Ok(InteractiveCommand::Load(PathBuf::from("My Song.wav")))
        );
        assert_eq!(parse_command("export"), Ok(InteractiveCommand::Export(None)));
        assert_eq!(parse_command("q"), Ok(InteractiveCommand::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("echo 0.3").unwrap_err().contains("echo feedback"));
        assert!(parse_command("rate fast").unwrap_err().contains("not a number"));
        assert!(parse_command("load").is_err());
        assert!(parse_command("dance").unwrap_err().contains("unknown"));
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00.000");
        assert_eq!(format_time(65.25), "1:05.250");
        assert_eq!(format_time(-3.0), "0:00.000");
    }

    #[test]
    fn test_build_config_applies_ffmpeg_override() {
        let cli = Cli {
            verbose: false,
            config: None,
            ffmpeg: Some(PathBuf::from("/usr/local/bin/ffmpeg")),
            backend: None,
            command: None,
        };
        let config = build_config(&cli).unwrap();
        assert_eq!(
            config.transcoder.program,
            PathBuf::from("/usr/local/bin/ffmpeg")
        );
        assert_eq!(config.output.backend, OutputBackend::System);
    }

    #[test]
    fn test_build_config_applies_backend_override() {
        let cli = Cli {
            verbose: false,
            config: None,
            ffmpeg: None,
            backend: Some(OutputBackend::Headless),
            command: None,
        };
        let config = build_config(&cli).unwrap();
        assert_eq!(config.output.backend, OutputBackend::Headless);
    }
}
