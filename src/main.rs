//! # Support Copilot CLI (`copilot`)
//!
//! Commands for building the documentation index, bulk-classifying the
//! ticket dataset, asking grounded questions, and triaging a single ticket
//! end to end.
//!
//! ## Usage
//!
//! ```bash
//! copilot --config ./config/copilot.toml <command>
//!
//! copilot build-index
//! copilot classify
//! copilot ask "How do I set up SSO with Azure AD?"
//! copilot ask --interactive
//! copilot triage --subject "Login broken" --body "SSO redirect loops forever"
//! copilot clear-cache
//! ```
//!
//! Every command that talks to the model provider requires `GEMINI_API_KEY`
//! in the environment.

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use support_copilot::answer::{AnswerEngine, AnswerEvent};
use support_copilot::classify::{GeminiClassifier, TicketClassifier};
use support_copilot::config::{load_config, require_api_key, Config};
use support_copilot::embedding::GeminiEmbedder;
use support_copilot::error::CopilotError;
use support_copilot::index::{build_index, VectorIndex};
use support_copilot::llm::GeminiClient;
use support_copilot::models::{render_history, ConversationTurn, Role, Ticket};
use support_copilot::pipeline::{load_or_classify, load_tickets, BulkOutcome};
use support_copilot::retriever::Retriever;

#[derive(Parser)]
#[command(name = "copilot", about = "Support ticket triage and grounded answering", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "./config/copilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the configured documentation sources and build the vector index
    BuildIndex,
    /// Classify the ticket dataset, writing results to the cache file
    Classify,
    /// Ask a question grounded in the indexed documentation
    Ask {
        /// The question to answer (omit with --interactive)
        query: Option<String>,
        /// Start an interactive session with conversation history
        #[arg(long)]
        interactive: bool,
    },
    /// Classify one ticket and either answer it or route it
    Triage {
        /// Ticket subject line
        #[arg(long)]
        subject: String,
        /// Ticket body text
        #[arg(long)]
        body: String,
    },
    /// Delete the classification cache so the next run reclassifies
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::BuildIndex => cmd_build_index(&config).await,
        Commands::Classify => cmd_classify(&config).await,
        Commands::Ask { query, interactive } => cmd_ask(&config, query, interactive).await,
        Commands::Triage { subject, body } => cmd_triage(&config, subject, body).await,
        Commands::ClearCache => cmd_clear_cache(&config),
    }
}

async fn cmd_build_index(config: &Config) -> Result<()> {
    let api_key = require_api_key()?;
    println!("Building index...");
    build_index(config, &api_key).await?;
    println!("Done.");
    Ok(())
}

async fn cmd_classify(config: &Config) -> Result<()> {
    let api_key = require_api_key()?;
    let tickets = load_tickets(&config.pipeline.tickets_path)?;
    println!("Loaded {} tickets", tickets.len());

    let client = GeminiClient::new(api_key, config.llm.timeout_secs)?;
    let classifier = GeminiClassifier::new(client, config.llm.model.clone());

    let bar = ProgressBar::new(tickets.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{bar:40} {pos}/{len} tickets classified",
    )?);

    let report = load_or_classify(
        &classifier,
        &tickets,
        &config.pipeline.cache_path,
        Duration::from_secs(config.pipeline.delay_secs),
        |done| bar.set_position(done as u64),
    )
    .await?;
    bar.finish_and_clear();

    match &report.outcome {
        BulkOutcome::Completed => {
            println!(
                "{} classifications available in {}",
                report.records.len(),
                config.pipeline.cache_path.display()
            );
        }
        BulkOutcome::FailedPartial { ticket_id, error } => {
            println!(
                "Stopped at ticket {}: {}\n{} classifications cached in {}; rerun after clearing the cache to retry",
                ticket_id,
                error,
                report.records.len(),
                config.pipeline.cache_path.display()
            );
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn cmd_ask(config: &Config, query: Option<String>, interactive: bool) -> Result<()> {
    let api_key = require_api_key()?;
    let engine = answer_engine(config, api_key).await?;

    if interactive {
        return interactive_session(&engine).await;
    }

    let Some(query) = query else {
        anyhow::bail!("provide a question, or pass --interactive");
    };

    stream_answer(&engine, &query, "").await?;
    Ok(())
}

async fn cmd_triage(config: &Config, subject: String, body: String) -> Result<()> {
    let api_key = require_api_key()?;

    let ticket = Ticket {
        id: "adhoc".to_string(),
        subject,
        body,
    };

    let client = GeminiClient::new(api_key.clone(), config.llm.timeout_secs)?;
    let classifier = GeminiClassifier::new(client, config.llm.model.clone());
    let classification = classifier.classify(&ticket.classification_text()).await?;

    println!("Topic tags:       {}", classification.topic_tags.join(", "));
    println!("Sentiment:        {}", classification.sentiment);
    println!("Priority:         {}", classification.priority);
    println!("Summary:          {}", classification.summary);
    println!("Suggested action: {}", classification.suggested_action);
    println!();

    if classification.is_routable() {
        let engine = answer_engine(config, api_key).await?;
        stream_answer(&engine, &ticket.classification_text(), "").await?;
    } else {
        println!("{}", classification.routing_notice());
    }
    Ok(())
}

fn cmd_clear_cache(config: &Config) -> Result<()> {
    let path = &config.pipeline.cache_path;
    if path.exists() {
        std::fs::remove_file(path)?;
        println!("Removed {}", path.display());
    } else {
        println!("No cache at {}", path.display());
    }
    Ok(())
}

/// Load the index and wire up retrieval + generation. A missing index gets
/// a friendly pointer to `build-index` instead of a raw error chain.
async fn answer_engine(config: &Config, api_key: String) -> Result<AnswerEngine> {
    let index = match VectorIndex::load(&config.index.path).await {
        Ok(index) => index,
        Err(e) => {
            if let Some(not_found) = e.downcast_ref::<CopilotError>() {
                anyhow::bail!("{}", not_found);
            }
            return Err(e);
        }
    };

    let embedder = GeminiEmbedder::new(api_key.clone(), &config.embedding)?;
    let retriever = Retriever::new(index, Box::new(embedder));
    let llm = GeminiClient::new(api_key, config.llm.timeout_secs)?;

    Ok(AnswerEngine::new(
        retriever,
        llm,
        config.llm.model.clone(),
        config.retrieval.top_k,
    ))
}

/// Stream one answer to stdout, printing sources after the text.
/// Returns the full answer text for history keeping.
async fn stream_answer(engine: &AnswerEngine, query: &str, history: &str) -> Result<String> {
    let mut stream = engine.answer(query, history).await?;
    let mut answer_text = String::new();

    while let Some(event) = stream.next().await {
        match event? {
            AnswerEvent::Chunk(text) => {
                print!("{}", text);
                std::io::stdout().flush()?;
                answer_text.push_str(&text);
            }
            AnswerEvent::Sources(sources) => {
                println!();
                if !sources.is_empty() {
                    println!("\nSources:");
                    for source in sources {
                        println!("  - {}", source);
                    }
                }
            }
        }
    }

    Ok(answer_text)
}

/// Read questions from stdin until EOF, carrying conversation history
/// across turns within the session. History lives only in memory.
async fn interactive_session(engine: &AnswerEngine) -> Result<()> {
    const MAX_HISTORY_TURNS: usize = 8;

    let mut turns: Vec<ConversationTurn> = Vec::new();
    let stdin = std::io::stdin();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }

        let history = render_history(&turns, MAX_HISTORY_TURNS);
        let answer_text = stream_answer(engine, query, &history).await?;

        turns.push(ConversationTurn {
            role: Role::User,
            content: query.to_string(),
            sources: None,
        });
        turns.push(ConversationTurn {
            role: Role::Assistant,
            content: answer_text,
            sources: None,
        });
    }

    Ok(())
}
