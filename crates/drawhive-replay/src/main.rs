//! Headless replay of a recorded drawhive session.
//!
//! Feeds a JSON lines recording through a canvas model in playback mode,
//! prints a summary of the resulting canvas and optionally writes a
//! snapshot that rebuilds it.

use clap::Parser;
use drawhive_core::protocol::{SERVER_ID, commands_to_json_lines};
use drawhive_core::recording::read_recording;
use drawhive_core::{CanvasEvent, CanvasModel, SessionConfig};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

/// Replay a recorded drawing session
#[derive(Parser, Debug)]
#[command(name = "drawhive-replay")]
#[command(about = "Replay a recorded drawing session")]
#[command(version)]
struct Cli {
    /// Recording to replay (JSON lines)
    recording: PathBuf,

    /// Session configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the commands rebuilding the final canvas to this file
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Also replay commands that were filtered when recorded
    #[arg(long)]
    include_filtered: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("Replay failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let recording = read_recording(BufReader::new(File::open(&cli.recording)?))?;
    log::info!(
        "Loaded {} commands from {}",
        recording.len(),
        cli.recording.display()
    );

    let mut model = CanvasModel::new(SERVER_ID, config)?;
    model.start_playback()?;

    let mut skipped = 0usize;
    for entry in recording {
        if entry.filtered && !cli.include_filtered {
            skipped += 1;
            continue;
        }
        model.handle(entry.command);
        log_events(model.take_events());
    }
    model.end_playback()?;
    log_events(model.take_events());
    if skipped > 0 {
        log::info!("Skipped {skipped} filtered commands");
    }

    print_summary(&model);

    if let Some(path) = &cli.snapshot {
        let snapshot = model.generate_snapshot(true);
        std::fs::write(path, commands_to_json_lines(&snapshot)?)?;
        log::info!("Wrote {} snapshot commands to {}", snapshot.len(), path.display());
    }
    Ok(())
}

fn log_events(events: Vec<CanvasEvent>) {
    for event in events {
        match event {
            CanvasEvent::UserJoined { id, name } => log::info!("User {id} joined: {name}"),
            CanvasEvent::UserLeft { id, name } => {
                log::info!("User {id} left: {}", name.as_deref().unwrap_or("?"))
            }
            CanvasEvent::ChatReceived { user, message, .. } => {
                log::info!("<{user}> {message}")
            }
            CanvasEvent::CanvasResized { offset_x, offset_y } => {
                log::debug!("Canvas resized, content moved by {offset_x},{offset_y}")
            }
            CanvasEvent::CatchupProgress(progress) => log::debug!("Catchup {progress}%"),
            _ => {}
        }
    }
}

fn print_summary(model: &CanvasModel) {
    let stack = model.layer_stack();
    println!("Session {}", model.session_id());
    println!(
        "Canvas {}x{}, background #{:08x}",
        stack.width(),
        stack.height(),
        stack.background()
    );
    for layer in stack.layers() {
        println!(
            "  layer {:#06x} \"{}\" opacity {} {:?}",
            layer.id(),
            layer.title,
            layer.opacity,
            layer.blend
        );
    }
    for user in model.users().users() {
        println!("  user {} {}", user.id, user.name);
    }
    println!(
        "History: {} entries, {}",
        model.history().len(),
        if model.has_full_history() {
            "complete"
        } else {
            "compacted"
        }
    );
}
