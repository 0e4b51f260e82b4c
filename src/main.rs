//! chatstream binary entry point

use std::io::Write;

use chatstream::{
    cli::{text_update, Cli, Commands, TextUpdate},
    config::{BackendKind, Config},
    messages::Exchange,
    services::{AnswerState, AnswerStatus, ChatClient},
};
use color_eyre::Result;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Install error handler
    color_eyre::install()?;
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("chatstream=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Handle commands
    match cli.command {
        Some(Commands::Ask {
            question,
            backend,
            assistant,
            session,
            no_stream,
        }) => {
            let config = Config::load()?;
            if let Err(e) = config.validate() {
                tracing::warn!("{e}");
            }

            let mut exchange =
                Exchange::new(backend, question).with_stream(config.stream && !no_stream);
            if let Some(id) = assistant {
                exchange = exchange.with_assistant(id);
            }
            if let Some(id) = session {
                exchange = exchange.with_session(id);
            }

            let client = ChatClient::from_config(config)?;
            let answer = tokio::select! {
                answer = print_answer(&client, exchange) => answer?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("\ncancelled");
                    std::process::exit(130);
                }
            };

            if let Some(state) = answer {
                print_trailer(&state, backend);
                if state.status == AnswerStatus::Failed {
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Config { list, path }) => {
            if path || !list {
                println!("global:  {}", Config::global_config_path().display());
                println!("project: {}", Config::project_config_path().display());
            }
            if list {
                let config = Config::load()?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }
        Some(Commands::Version) => {
            println!("chatstream version {}", env!("CARGO_PKG_VERSION"));
        }
        None => {
            println!("Use --help for more information");
        }
    }

    Ok(())
}

/// Print the answer as it grows and return the last snapshot
async fn print_answer(client: &ChatClient, exchange: Exchange) -> Result<Option<AnswerState>> {
    let mut snapshots = client.submit(exchange);
    let mut stdout = std::io::stdout();
    let mut shown = String::new();
    let mut last = None;

    while let Some(state) = snapshots.next().await {
        match text_update(&shown, &state.text) {
            TextUpdate::Unchanged => {}
            TextUpdate::Append(suffix) => write!(stdout, "{suffix}")?,
            TextUpdate::Replace(text) => write!(stdout, "\n{text}")?,
        }
        stdout.flush()?;
        shown.clone_from(&state.text);
        last = Some(state);
    }

    Ok(last)
}

fn print_trailer(state: &AnswerState, backend: BackendKind) {
    if !state.text.is_empty() {
        println!();
    }

    if !state.references.is_empty() {
        println!("\nReferences:");
        for (i, reference) in state.references.iter().enumerate() {
            match reference.page {
                Some(page) => println!("  [{}] {} (p. {page})", i + 1, reference.name),
                None => println!("  [{}] {}", i + 1, reference.name),
            }
        }
    }

    if let Some(session) = &state.session_id {
        if backend == BackendKind::Retrieval {
            eprintln!("session: {session}");
        }
    }

    if let Some(error) = &state.error {
        eprintln!("error: {error}");
    }
}
