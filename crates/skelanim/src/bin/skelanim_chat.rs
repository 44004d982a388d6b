//! # SKELANIM Chat
//!
//! Headless console for the demo's networking: type the same commands the
//! in-game developer console accepts.
//!
//! ## Usage
//!
//! ```bash
//! skelanim_chat --config skelanim.toml --rate 60
//! > Server port=25564
//! > Connect
//! > Send message="hello"
//! > Quit
//! ```

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use skelanim::{AppConfig, ConsoleCommand, FrameClock, Game};
use skelanim_networking::NetworkContext;
use std::io::BufRead;
use std::process::ExitCode;
use std::thread;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // Parse command line arguments (simple parsing, no external deps)
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;
    let mut rate: Option<u32> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--rate" | "-r" => {
                if i + 1 < args.len() {
                    rate = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: skelanim_chat [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>   TOML configuration file");
                println!("  -r, --rate <HZ>       Frame rate (default: 60)");
                println!("  -h, --help            Show this help");
                println!();
                println!("Commands: Connect host= port= | Server port= | Send message= |");
                println!("          Disconnect | Stop | Controls | Quit");
                return ExitCode::SUCCESS;
            }
            other => eprintln!("ignoring unknown argument: {other}"),
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => match AppConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load {path}: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };
    if let Some(rate) = rate.filter(|&rate| rate > 0) {
        config.frame_rate = rate;
    }

    let context = match NetworkContext::startup() {
        Ok(context) => context,
        Err(err) => {
            eprintln!("networking failed to start: {err}");
            return ExitCode::FAILURE;
        }
    };

    let lines = spawn_stdin_reader();
    let mut game = Game::new(&context, config.network.clone());
    let mut clock = FrameClock::new(config.frame_rate);
    let mut printed = 0;

    tracing::info!(frame_rate = config.frame_rate, "console ready");

    'frames: loop {
        clock.wait_for_next_frame();

        while clock.should_tick() {
            let frame_start = clock.begin_frame();

            loop {
                match lines.try_recv() {
                    Ok(line) => match ConsoleCommand::parse(&line) {
                        Ok(Some(command)) => {
                            if !game.execute(command) {
                                break 'frames;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => eprintln!("{err}"),
                    },
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'frames,
                }
            }

            game.update();

            let log = game.chat_log();
            for line in log.since(printed) {
                println!("{line}");
            }
            printed = log.len();
            drop(log);

            clock.end_frame(frame_start);
        }
    }

    game.shutdown();
    let stats = clock.stats();
    tracing::info!(
        frames = stats.total_frames,
        avg_frame_us = stats.avg_frame_us,
        late_frames = stats.late_frames,
        "console closed"
    );
    ExitCode::SUCCESS
}

/// Forwards stdin lines to the frame loop; the channel closes at EOF.
fn spawn_stdin_reader() -> Receiver<String> {
    let (sender, receiver) = unbounded();
    let spawned = thread::Builder::new()
        .name("skelanim-stdin".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        tracing::error!("stdin reader failed to start: {err}");
    }
    receiver
}
