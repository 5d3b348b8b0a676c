//! tq - query an LLM straight from your terminal.
//!
//! Joins the command-line words into a query, folds in piped stdin and
//! recent tmux pane history, sends the result to whichever provider has a
//! credential configured, and streams the reply to stdout.

mod config;
mod llm;
mod prompt;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tq")]
#[command(author, version, about = "Query an LLM straight from your terminal")]
struct Cli {
    /// The query, as free-form words.
    #[arg(value_name = "QUERY")]
    query: Vec<String>,

    /// Wait for the complete reply instead of streaming it.
    #[arg(long)]
    no_stream: bool,

    /// Override the model for this invocation.
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr so they never mix into the streamed answer.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tq=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = config::Config::load()?;
    if let Some(model) = cli.model {
        config.model = model;
    }

    let Some(credentials) = config::Credentials::detect()? else {
        println!("Error: No valid LLM API key found in environment variables.");
        let names: Vec<&str> = config::CREDENTIAL_VARS.iter().map(|(name, _)| *name).collect();
        println!("Please set one of the following environment variables: {names:?}");
        return Ok(());
    };

    let client = llm::build_client(&credentials, config.model.clone(), config.max_tokens);
    tracing::debug!(
        "using provider {} with model {}",
        client.provider(),
        client.model()
    );

    let conversation = vec![
        llm::Message::system(config.system_prompt.clone()),
        llm::Message::user(prompt::build_prompt(&cli.query)),
    ];

    print!("\nAssistant: ");
    std::io::stdout().flush()?;

    let extra = serde_json::Map::new();
    if cli.no_stream {
        match client.send(&conversation, &extra).await {
            Ok(reply) => print!("{}", reply.content().unwrap_or_default()),
            Err(e) => report_api_error(&e),
        }
    } else {
        match client.stream(&conversation, &extra).await {
            Ok(mut fragments) => {
                while let Some(fragment) = fragments.next().await {
                    match fragment {
                        Ok(text) => {
                            print!("{text}");
                            std::io::stdout().flush()?;
                        }
                        Err(e) => {
                            report_api_error(&e);
                            break;
                        }
                    }
                }
            }
            Err(e) => report_api_error(&e),
        }
    }
    println!();

    Ok(())
}

/// Render a provider failure without aborting the session.
///
/// Real assistant text and this canned line stay on separate channels; the
/// error never becomes a message value.
fn report_api_error(error: &llm::ChatError) {
    eprintln!("\nThere was an API error: {error}. Please try again.");
}
