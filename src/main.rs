use soql_copilot::config::CopilotConfig;
use soql_copilot::execution::{RestConnection, RestQueryEngine, StatementExecutor};
use soql_copilot::execution_loop::{HealingOutcome, HealingReport};
use soql_copilot::llm::{LlmClient, TextGenerator};
use soql_copilot::schema::{
    CachedSchemaProvider, RestSchemaProvider, SchemaProvider, StaticSchemaProvider,
};
use soql_copilot::Copilot;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "soql-copilot")]
#[command(about = "Natural-language questions to self-healing SOQL statements")]
#[command(version)]
struct Args {
    /// JSON configuration file (or set COPILOT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Load object metadata from a JSON export instead of the describe endpoints
    #[arg(long, global = true)]
    schema_file: Option<PathBuf>,

    /// Maximum rows fetched per statement
    #[arg(long, global = true, default_value_t = 2000)]
    max_rows: usize,

    /// How long describe results are cached, in seconds
    #[arg(long, global = true, default_value_t = 600)]
    schema_ttl_secs: u64,

    /// Add every entity type in the schema catalogue to mention detection
    #[arg(long, global = true)]
    refresh_vocabulary: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        question: String,
    },
    /// Interactive session; follow-up questions see earlier answers
    Chat {
        #[arg(long, default_value = "cli")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CopilotConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CopilotConfig::from_env()?,
    };

    let connection = Arc::new(RestConnection::from_env()?);
    let executor: Arc<dyn StatementExecutor> =
        Arc::new(RestQueryEngine::new(Arc::clone(&connection), args.max_rows));
    let generator: Arc<dyn TextGenerator> = Arc::new(LlmClient::from_env()?);
    let schema: Arc<dyn SchemaProvider> = match &args.schema_file {
        Some(path) => {
            info!("Using schema from {}", path.display());
            Arc::new(StaticSchemaProvider::from_file(path)?)
        }
        None => Arc::new(CachedSchemaProvider::new(
            Arc::new(RestSchemaProvider::new(connection)),
            Duration::from_secs(args.schema_ttl_secs),
            256,
        )),
    };

    let mut copilot = Copilot::new(&config, generator, executor, schema)?;
    if args.refresh_vocabulary {
        match copilot.refresh_vocabulary().await {
            Ok(count) => info!("Entity vocabulary has {} types", count),
            Err(e) => warn!("Could not refresh entity vocabulary: {}", e),
        }
    }

    match args.command {
        Commands::Ask { question } => {
            let report = ask_once(&copilot, "cli", &question).await?;
            print_report(&report);
        }
        Commands::Chat { session } => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                print!("\n> ");
                std::io::stdout().flush()?;
                let Some(line) = lines.next_line().await? else {
                    break;
                };
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                if matches!(question, "exit" | "quit") {
                    break;
                }
                match ask_once(&copilot, &session, question).await {
                    Ok(report) => print_report(&report),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
    }

    Ok(())
}

/// Run one request; ctrl-c cancels it without ending the process.
async fn ask_once(copilot: &Copilot, session: &str, question: &str) -> Result<HealingReport> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = copilot.ask(session, question, &cancel).await;
    watcher.abort();
    Ok(result?)
}

fn print_report(report: &HealingReport) {
    println!("\n=== {:?} ({} attempts) ===", report.outcome, report.attempts.len());

    for attempt in &report.attempts {
        match &attempt.outcome.error_message {
            Some(error) => println!("  #{} {}\n     -> {}", attempt.attempt_number, attempt.statement, error),
            None => println!("  #{} {}", attempt.attempt_number, attempt.statement),
        }
    }

    match report.outcome {
        HealingOutcome::Succeeded => {
            if let Some(statement) = &report.final_statement {
                println!("\n{}", statement);
            }
            if let Some(rows) = &report.rows {
                println!("\n{} of {} records", rows.len(), rows.total_count);
                for record in rows.records.iter().take(20) {
                    println!("{}", record);
                }
            }
        }
        HealingOutcome::Ambiguous => {
            if let Some(question) = &report.clarification {
                println!("\n{}", question);
            }
        }
        _ => {
            if let Some(reason) = &report.reason {
                println!("\n{}", reason);
            }
        }
    }
}
