use anyhow::Result;
use std::path::PathBuf;
use std::process::exit;

use photoscribe::config::Config;
use photoscribe::db::{EnqueueOptions, EnqueueOutcome, Priority, RunType, Store};
use photoscribe::poll;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        exit(1);
    }

    match args[1].as_str() {
        "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "--version" | "-V" => {
            println!("photoscribe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "ingest" => cmd_ingest(&args[2..]),
        "enqueue" => cmd_enqueue(&args[2..]),
        "status" => cmd_status(&args[2..]),
        "history" => cmd_history(&args[2..]),
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"photoscribe - AI photo analysis pipeline

USAGE:
    photoscribe <COMMAND> [OPTIONS]

COMMANDS:
    ingest <photo-id> <image-path>   Register a photo (state: unanalyzed)
    enqueue <photo-id> [OPTIONS]     Queue a photo for analysis
    status <photo-id>                Poll analysis status (read-only)
    history <photo-id>               Print the full run history

ENQUEUE OPTIONS:
    --model <id>       Candidate model, repeatable, dispatch order
                       (default: configured fallback list)
    --high             High priority
    --rerun            Tag as a manual re-run
    --reset-retries    Start the retry budget over

ENVIRONMENT:
    PHOTOSCRIBE_CONFIG   Path to config file
    PHOTOSCRIBE_LOG      Log level (trace, debug, info, warn, error)

The queue is processed by photoscribe-daemon; see its --help.
"#
    );
}

fn open_store() -> Result<(Config, Store)> {
    let config = Config::load()?;
    let store = Store::open(&config.db_path)?;
    Ok((config, store))
}

fn cmd_ingest(args: &[String]) -> Result<()> {
    let [photo_id, image_path] = args else {
        eprintln!("Usage: photoscribe ingest <photo-id> <image-path>");
        exit(1);
    };

    let path = PathBuf::from(image_path);
    if !path.exists() {
        eprintln!("Image not found: {}", path.display());
        exit(1);
    }

    let (_config, store) = open_store()?;
    store.insert_photo(photo_id, &path)?;
    println!("Registered {} -> {}", photo_id, path.display());
    Ok(())
}

fn cmd_enqueue(args: &[String]) -> Result<()> {
    let Some(photo_id) = args.first() else {
        eprintln!("Usage: photoscribe enqueue <photo-id> [OPTIONS]");
        exit(1);
    };

    let mut models: Vec<String> = Vec::new();
    let mut priority = Priority::Normal;
    let mut run_type = RunType::Initial;
    let mut reset_retries = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--model" | "-m" => {
                if i + 1 < args.len() {
                    models.push(args[i + 1].clone());
                    i += 1;
                } else {
                    eprintln!("Error: --model requires an identifier");
                    exit(1);
                }
            }
            "--high" => priority = Priority::High,
            "--rerun" => run_type = RunType::ManualRerun,
            "--reset-retries" => reset_retries = true,
            other => {
                eprintln!("Unknown option: {}", other);
                exit(1);
            }
        }
        i += 1;
    }

    let (config, store) = open_store()?;
    if models.is_empty() {
        models = config.analysis.default_models.clone();
    }

    let outcome = store.enqueue(
        photo_id,
        &EnqueueOptions {
            models,
            priority,
            run_type,
            reset_retries,
        },
    )?;

    match outcome {
        EnqueueOutcome::Accepted => println!(r#"{{"accepted": true}}"#),
        EnqueueOutcome::Rejected(reason) => {
            println!(r#"{{"accepted": false, "reason": "{}"}}"#, reason.as_str());
            exit(1);
        }
    }
    Ok(())
}

fn cmd_status(args: &[String]) -> Result<()> {
    let [photo_id] = args else {
        eprintln!("Usage: photoscribe status <photo-id>");
        exit(1);
    };

    let (_config, store) = open_store()?;
    match poll::get_status(&store, photo_id)? {
        Some(status) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        None => {
            eprintln!("Unknown photo: {}", photo_id);
            exit(1);
        }
    }
}

fn cmd_history(args: &[String]) -> Result<()> {
    let [photo_id] = args else {
        eprintln!("Usage: photoscribe history <photo-id>");
        exit(1);
    };

    let (_config, store) = open_store()?;
    let runs = store.runs_for_photo(photo_id)?;
    if runs.is_empty() {
        println!("No runs recorded for {}", photo_id);
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&runs)?);
    Ok(())
}
