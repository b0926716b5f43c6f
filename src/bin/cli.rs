// CLI binary: exiting on unrecoverable errors is standard for CLI tools.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};

use syntax_to_sound::command::command_schema;
use syntax_to_sound::emitter;
use syntax_to_sound::error::AppError;
use syntax_to_sound::llm::prompt::Intent;
use syntax_to_sound::llm::resolve::{self, ProcessEnv, RealFs};
use syntax_to_sound::llm::Orchestrator;
use syntax_to_sound::logging;
use syntax_to_sound::normalizer;
use syntax_to_sound::paths;
use syntax_to_sound::session::SessionState;
use syntax_to_sound::settings::{self, SettingsInfo};
use syntax_to_sound::sink::{ExecutionSink, ProcessSink, WriterSink};
use syntax_to_sound::turn::{self, SessionRegistry, TurnRequest};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "sts-cli", about = "Verified live-coding patches from loose requests", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory override (settings, credentials, audit log)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    /// More log output on stderr (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair a raw command batch (file path or `-` for stdin)
    Normalize { input: String },
    /// Validate a batch and print the runtime program it compiles to
    Emit { input: String },
    /// Print the JSON schema of a command envelope
    Schema,
    /// Show which generation backends would be tried, in order
    Backends,
    /// Generate a patch without applying it
    Generate {
        #[arg(long)]
        prompt: String,
        #[arg(long, value_enum, default_value_t = Intent::Edit)]
        intent: Intent,
    },
    /// Run one full turn against a runtime (stdout unless --runtime-cmd)
    Turn {
        #[arg(long)]
        prompt: String,
        #[arg(long, value_enum, default_value_t = Intent::Edit)]
        intent: Intent,
        /// Song file whose state seeds the session
        #[arg(long)]
        song: Option<PathBuf>,
        /// Runtime command line, e.g. "python -m FoxDot --pipe"
        #[arg(long)]
        runtime_cmd: Option<String>,
    },
    /// Print the globals and players a song file sets up
    SongState { file: PathBuf },
    /// Generation settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective settings (API key redacted)
    Show,
    /// Persist one setting; `api_key` goes to the credentials file
    Set { key: String, value: String },
}

// ── Helpers ──────────────────────────────────────────────────────

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("Error: {e}");
    process::exit(1);
}

fn read_input(input: &str) -> String {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .unwrap_or_else(|e| fail(e));
        text
    } else {
        std::fs::read_to_string(input).unwrap_or_else(|e| fail(format!("{input}: {e}")))
    }
}

/// A batch file holds either a JSON array or `{"commands": [...]}`.
fn read_batch(input: &str) -> Vec<Value> {
    let value: Value = serde_json::from_str(&read_input(input)).unwrap_or_else(|e| fail(e));
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("commands") {
            Some(Value::Array(items)) => items,
            _ => fail(AppError::InputShape {
                message: "object has no `commands` array".into(),
            }),
        },
        other => fail(AppError::InputShape {
            message: format!("expected a list of commands, got {other}"),
        }),
    }
}

fn config_dir(cli: &Cli) -> Option<PathBuf> {
    cli.config_dir
        .clone()
        .or_else(|| paths::default_config_dir(&ProcessEnv))
}

fn load_settings(dir: Option<&Path>) -> settings::GenerationSettings {
    settings::load(dir, &ProcessEnv).unwrap_or_else(|e| fail(e))
}

fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn print_notes(notes: &[String]) {
    for note in notes {
        eprintln!("note: {note}");
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let dir = config_dir(&cli);
    let raw = cli.json;

    match &cli.command {
        Commands::Normalize { input } => {
            let (commands, notes) = normalizer::normalize(&read_batch(input));
            if raw {
                print_json(&json!({ "commands": commands, "notes": notes }));
            } else {
                print_notes(&notes);
                print_json(&commands);
            }
        }
        Commands::Emit { input } => match emitter::validate_and_emit(&read_batch(input)) {
            Ok(batch) if raw => print_json(&batch),
            Ok(batch) => println!("{}", batch.text),
            Err(e) if raw => {
                print_json(&e);
                process::exit(1);
            }
            Err(e) => {
                for message in e.messages() {
                    eprintln!("Error: {message}");
                }
                process::exit(1);
            }
        },
        Commands::Schema => print_json(&command_schema()),
        Commands::Backends => {
            let settings = load_settings(dir.as_deref());
            let orchestrator = Orchestrator::from_settings(&settings, &ProcessEnv, &RealFs);
            let names = orchestrator.backend_names();
            if raw {
                print_json(&json!({ "mode": settings.backend, "backends": names }));
            } else if names.is_empty() {
                println!("{}", AppError::NoBackendAvailable);
            } else {
                for (i, name) in names.iter().enumerate() {
                    println!("{}. {name}", i + 1);
                }
            }
        }
        Commands::Generate { prompt, intent } => {
            let settings = load_settings(dir.as_deref());
            let orchestrator = Orchestrator::from_settings(&settings, &ProcessEnv, &RealFs);
            let generation = orchestrator
                .generate_patch(prompt, *intent, &SessionState::new().snapshot())
                .await
                .unwrap_or_else(|e| fail(e));
            let (commands, notes) = normalizer::normalize(&generation.commands);
            if raw {
                print_json(&json!({
                    "model": generation.model,
                    "commands": commands,
                    "notes": notes,
                }));
            } else {
                eprintln!("model: {}", generation.model);
                print_notes(&notes);
                print_json(&commands);
            }
        }
        Commands::Turn {
            prompt,
            intent,
            song,
            runtime_cmd,
        } => {
            let settings = load_settings(dir.as_deref());
            let orchestrator = Orchestrator::from_settings(&settings, &ProcessEnv, &RealFs);
            let registry = SessionRegistry::new(dir.as_deref().map(paths::audit_dir));
            let shared = registry.get_or_create("cli");
            let mut session = shared.lock().await;

            if let Some(path) = song {
                let source = std::fs::read_to_string(path)
                    .unwrap_or_else(|e| fail(format!("{}: {e}", path.display())));
                if let Err(errors) = session.state.load_song(&path.to_string_lossy(), &source) {
                    for e in errors {
                        eprintln!("warning: {e}");
                    }
                }
            }

            let request = TurnRequest {
                prompt: prompt.clone(),
                intent: *intent,
            };
            let process_sink = runtime_cmd.as_deref().map(|line| {
                let words = resolve::split_command(line)
                    .unwrap_or_else(|| fail(format!("cannot parse runtime command {line:?}")));
                ProcessSink::spawn(&words, None).unwrap_or_else(|e| fail(e))
            });
            let writer_sink = WriterSink::new(tokio::io::stdout());
            let sink: &dyn ExecutionSink = match &process_sink {
                Some(p) => p,
                None => &writer_sink,
            };

            let outcome = turn::run_turn(&mut session, sink, &orchestrator, &request).await;
            if let Some(p) = &process_sink {
                p.shutdown();
            }
            if raw {
                print_json(&outcome);
            } else {
                eprintln!("model: {}  status: {:?}", outcome.model, outcome.apply_status);
                print_notes(&outcome.notes);
                for e in &outcome.errors {
                    eprintln!("Error: {e}");
                }
            }
            if outcome.apply_status != turn::ApplyStatus::Applied {
                process::exit(1);
            }
        }
        Commands::SongState { file } => {
            let source = std::fs::read_to_string(file)
                .unwrap_or_else(|e| fail(format!("{}: {e}", file.display())));
            let mut state = SessionState::new();
            if let Err(errors) = state.load_song(&file.to_string_lossy(), &source) {
                for e in &errors {
                    eprintln!("Error: {e}");
                }
                process::exit(1);
            }
            print_json(&state.snapshot());
        }
        Commands::Config { action } => {
            let Some(dir) = dir else {
                fail("no config directory: pass --config-dir or set HOME");
            };
            match action {
                ConfigAction::Show => {
                    let info = SettingsInfo::from_settings(&load_settings(Some(&dir)));
                    if raw {
                        print_json(&info);
                    } else {
                        println!("config dir: {}", dir.display());
                        print_json(&info);
                    }
                }
                ConfigAction::Set { key, value } => {
                    if key == "api_key" {
                        settings::save_api_key(&dir, value).unwrap_or_else(|e| fail(e));
                    } else {
                        let mut file = settings::load_settings_file(&dir)
                            .unwrap_or_else(|e| fail(e))
                            .unwrap_or_default();
                        file.set(key, value).unwrap_or_else(|e| fail(e));
                        settings::save_settings_file(&dir, &file).unwrap_or_else(|e| fail(e));
                    }
                    println!("Updated {key}");
                }
            }
        }
    }
}
