use std::io::{Read, Write};
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use futures::StreamExt;
use tracing::info;
use uuid::Uuid;

use exchangestore::{RequestMessage, UserRequest};

use chatloom::cli::{Cli, Command};
use chatloom::config::Config;
use chatloom::orchestrator::{parse_architecture, parse_product};
use chatloom::storage::{FsAppStorage, StdoutPreview};
use chatloom::{AppOrchestrator, AppStorage, ChatResponse, ChatTurn, ModelResponse, ModelService, create_model};

fn setup_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();
    Ok(())
}

/// Read a response file, `-` meaning stdin
fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Extract { path } => {
            let text = read_input(&path)?;
            match chatloom::extract::extract_fenced_block(&text) {
                Some(block) => println!("{block}"),
                None => {
                    eprintln!("{} No fenced code block found", "✗".red());
                    std::process::exit(1);
                }
            }
        }
        Command::Sections { path } => {
            let text = read_input(&path)?;

            match parse_product(&text, "") {
                Some(spec) => {
                    println!("{}", "Product".cyan().bold());
                    println!("  Title: {}", spec.title);
                    if let Some(summary) = &spec.summary {
                        println!("  Summary: {summary}");
                    }
                    for feature in &spec.features {
                        println!("  - {feature}");
                    }
                }
                None => println!("{}", "No Product section".dimmed()),
            }

            match parse_architecture(&text, &config.keywords) {
                Some(design) => {
                    println!("{}", "Architecture".cyan().bold());
                    if let Some(layout) = &design.layout {
                        println!("  Layout: {layout}");
                    }
                    for line in &design.state_model {
                        println!("  {} {line}", "[state]".yellow());
                    }
                    for line in &design.interactions {
                        println!("  {} {line}", "[interaction]".yellow());
                    }
                    for line in &design.components {
                        println!("  {} {line}", "[component]".yellow());
                    }
                }
                None => println!("{}", "No Architecture section".dimmed()),
            }
        }
        Command::Generate { prompt, session } => {
            generate(&config, prompt, session).await?;
        }
        Command::History { full } => {
            let storage = FsAppStorage::new(FsAppStorage::default_path());
            let history = storage.list_history().await?;
            if history.is_empty() {
                println!("No stored apps");
            }
            for app in history {
                println!(
                    "{} {} {}",
                    app.id.cyan(),
                    app.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                    app.description
                );
                if full {
                    println!("{}", app.html);
                }
            }
        }
        Command::Show { id } => {
            let storage = FsAppStorage::new(FsAppStorage::default_path());
            match storage.get_by_id(&id)? {
                Some(app) => println!("{}", app.html),
                None => {
                    eprintln!("{} No stored app with id {id}", "✗".red());
                    std::process::exit(1);
                }
            }
        }
        Command::Delete { id } => {
            let storage = FsAppStorage::new(FsAppStorage::default_path());
            if storage.delete_by_id(&id)? {
                println!("{} Deleted {id}", "✓".green());
            } else {
                eprintln!("{} No stored app with id {id}", "✗".red());
                std::process::exit(1);
            }
        }
        Command::Config { init } => {
            if init {
                let path = dirs::config_dir()
                    .unwrap_or_else(|| std::path::PathBuf::from("."))
                    .join("chatloom")
                    .join("config.yml");
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).context("Failed to create config directory")?;
                }
                config.save(&path).context("Failed to write configuration")?;
                println!("{} Wrote {}", "✓".green(), path.display());
            } else {
                print!("{}", serde_yaml::to_string(&config)?);
            }
        }
    }

    Ok(())
}

/// Send one prompt through the dispatcher, echo the response to stderr as
/// it arrives, then hand the completed turn to the orchestrator. The
/// extracted artifact lands on stdout via the preview surface.
async fn generate(config: &Config, prompt: String, session: String) -> Result<()> {
    let model = create_model(&config.model)?;
    let service = Arc::new(ModelService::new());
    info!(model = model.id(), "generate: dispatching");

    let request = UserRequest::new(&session, Uuid::now_v7().to_string(), config.resolved_default_agent())
        .with_messages(vec![RequestMessage::user(prompt.clone())]);

    let response = service.send_request(&model, request).await?;

    let mut text = String::new();
    let mut is_error = false;
    match response {
        ModelResponse::Text(direct) => {
            eprintln!("{direct}");
            text = direct;
        }
        ModelResponse::Stream(mut stream) => {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(part) => {
                        if let Some(fragment) = part.as_text() {
                            eprint!("{fragment}");
                            let _ = std::io::stderr().flush();
                            text.push_str(fragment);
                        }
                    }
                    Err(e) => {
                        eprintln!("\n{} Stream failed: {e}", "✗".red());
                        is_error = true;
                        break;
                    }
                }
            }
            eprintln!();
        }
    }

    let orchestrator = AppOrchestrator::new(
        FsAppStorage::new(FsAppStorage::default_path()),
        StdoutPreview,
        config.keywords.clone(),
    );

    let turn = ChatTurn {
        session_id: session.clone(),
        request_text: prompt,
        response: ChatResponse {
            is_complete: true,
            is_error,
            text,
        },
    };
    orchestrator.handle_completed_chat_request(&turn).await;

    match orchestrator.get_state(&session) {
        Some(state) => {
            let stored = state
                .last_stored_app
                .map(|app| app.id)
                .unwrap_or_else(|| "(not stored)".to_string());
            eprintln!("{} Generated app {} ({} bytes)", "✓".green(), stored.cyan(), state.code.html.len());
        }
        None => {
            eprintln!("{} Response produced no app artifact", "✗".red());
            std::process::exit(1);
        }
    }

    Ok(())
}
