//! KG Assist CLI
//!
//! Ask the enterprise process graph questions from the terminal:
//! - `chat`: multi-turn conversation, with the executed queries under each reply
//! - `ask`: a single turn, optionally continuing an earlier conversation
//! - `check`: graph store and assistant health
//! - `tools`: capability declarations to register on the hosted assistant

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use kgassist_agent::{
    verify_assistant, Agent, AssistantConfig, AssistantsClient, Capability, PollConfig,
    QueryPipeline,
};
use kgassist_graph::{
    verify_graph, BuiltinSchemaProvider, FileSchemaProvider, Neo4jHttpExecutor, SchemaDocument,
    SchemaProvider,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod chat;

#[derive(Parser)]
#[command(name = "kgassist")]
#[command(
    author,
    version,
    about = "KG Assist: natural-language questions over the enterprise process graph"
)]
struct Cli {
    /// Verbosity level (-v debug, -vv trace); RUST_LOG applies otherwise
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Schema JSON used to ground query generation (default: $KGASSIST_SCHEMA_PATH or schema.json)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Ground with the built-in enterprise-process schema instead of a file
    #[arg(long, global = true, conflicts_with = "schema")]
    builtin_schema: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat. `/new` starts a fresh conversation, `/quit` exits.
    Chat,

    /// Answer one question.
    Ask {
        question: String,
        /// Continue this conversation instead of starting a new one
        #[arg(long)]
        conversation: Option<String>,
        /// Print the full response payload as JSON
        #[arg(long)]
        json: bool,
        /// Degraded two-pass mode: generate, run, format (no tool calls)
        #[arg(long, conflicts_with = "conversation")]
        simple: bool,
    },

    /// Verify graph store connectivity and the configured assistant.
    Check,

    /// Print the function declarations the hosted assistant must carry.
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Chat => {
            let schema = load_schema(&cli)?;
            let agent = Agent::new(reasoning_service()?, PollConfig::from_env()?)
                .with_schema(schema.as_ref());
            let graph = graph_executor()?;
            chat::run(&agent, &graph).await
        }
        Commands::Ask {
            question,
            conversation,
            json,
            simple,
        } => {
            let schema = load_schema(&cli)?;
            let service = reasoning_service()?;
            let poll = PollConfig::from_env()?;
            let graph = graph_executor()?;

            let response = if *simple {
                QueryPipeline::new(service, poll)
                    .with_schema(schema.as_ref())
                    .answer(question, &graph)
                    .await
            } else {
                Agent::new(service, poll)
                    .with_schema(schema.as_ref())
                    .respond(question, &graph, conversation.as_deref())
                    .await
            };

            if *json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", chat::render_response(&response));
                if let Some(id) = &response.conversation_id {
                    eprintln!("{} {}", "conversation:".dimmed(), id);
                }
            }
            if !response.is_success() {
                bail!("turn failed");
            }
            Ok(())
        }
        Commands::Check => check().await,
        Commands::Tools => {
            let definitions: Vec<_> = Capability::ALL.iter().map(|c| c.definition()).collect();
            println!("{}", serde_json::to_string_pretty(&definitions)?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_schema(cli: &Cli) -> Result<Option<SchemaDocument>> {
    let loaded = if cli.builtin_schema {
        BuiltinSchemaProvider.load()
    } else if let Some(path) = &cli.schema {
        FileSchemaProvider::new(path).load()
    } else {
        FileSchemaProvider::from_env().load()
    };
    let schema = loaded.context("failed to load schema")?;
    tracing::debug!(present = schema.is_some(), "schema loaded");
    Ok(schema)
}

fn reasoning_service() -> Result<Arc<AssistantsClient>> {
    let config = AssistantConfig::from_env().context("reasoning service is not configured")?;
    Ok(Arc::new(AssistantsClient::new(config)?))
}

fn graph_executor() -> Result<Neo4jHttpExecutor> {
    Neo4jHttpExecutor::from_env().context("graph store is not configured")
}

async fn check() -> Result<()> {
    let mut healthy = true;

    match graph_executor() {
        Ok(graph) => match verify_graph(&graph).await {
            Ok(()) => println!("{} graph store reachable", "ok".green().bold()),
            Err(err) => {
                healthy = false;
                println!("{} graph store: {err}", "fail".red().bold());
            }
        },
        Err(err) => {
            healthy = false;
            println!("{} {err:#}", "fail".red().bold());
        }
    }

    match reasoning_service() {
        Ok(client) => match verify_assistant(&client).await {
            Ok(name) => println!("{} assistant {}", "ok".green().bold(), name.bold()),
            Err(err) => {
                healthy = false;
                println!(
                    "{} assistant {}: {err}",
                    "fail".red().bold(),
                    client.assistant_id()
                );
            }
        },
        Err(err) => {
            healthy = false;
            println!("{} {err:#}", "fail".red().bold());
        }
    }

    if !healthy {
        bail!("health check failed");
    }
    Ok(())
}
