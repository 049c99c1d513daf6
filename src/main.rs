use std::path::PathBuf;

use ankilink::config::AppConfig;
use ankilink::importer::{ACTIVE_DECK, CardKind, DEFAULT_MODEL, ImportJob, Importer, PASSIVE_DECK};
use ankilink::rpc::{API_VERSION, Pipeline, RpcClient, Server};
use ankilink::{actions, logging};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ankilink")]
#[command(about = "Local JSON RPC server for flashcard collections", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; `ankilink.toml` is read when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the RPC server
    Serve(ServeArgs),
    /// Call one action on a running server and print the result
    Call(CallArgs),
    /// Import card list files through a running server
    Import(ImportArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Serialize)]
struct ServeArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    bind_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    bind_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long = "cors-origin")]
    cors_origins: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    grant_permission_requests: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    log_json: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Args)]
struct CallArgs {
    action: String,

    /// Parameters as a JSON object
    #[arg(long)]
    params: Option<String>,

    #[arg(long, default_value_t = API_VERSION)]
    version: i64,

    /// Server address, if not the configured one
    #[arg(long)]
    addr: Option<String>,
}

#[derive(Args)]
struct ImportArgs {
    /// Recognition cards, Japanese on the front
    #[arg(long)]
    passive: Option<PathBuf>,

    /// Production cards, English on the front
    #[arg(long)]
    active: Option<PathBuf>,

    #[arg(long, default_value = PASSIVE_DECK)]
    passive_deck: String,

    #[arg(long, default_value = ACTIVE_DECK)]
    active_deck: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Serve(args) => AppConfig::load(cli.config.as_deref(), Some(args))?,
        _ => AppConfig::load(cli.config.as_deref(), None::<&ServeArgs>)?,
    };

    match cli.command {
        Commands::Serve(_) => {
            logging::init(config.log_config())?;
            run_server(config).await.context("Failed to run server")?
        }
        Commands::Call(args) => run_call(&config, args).await.context("Call failed")?,
        Commands::Import(args) => {
            logging::init(config.log_config())?;
            run_import(&config, args).await.context("Import failed")?
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn run_server(config: AppConfig) -> Result<()> {
    let pipeline = Pipeline::new(config.origin_policy(), actions::build(&config));
    let mut server =
        Server::bind(&config.server_options(), pipeline).context("Failed to bind RPC server")?;

    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                server.pump();
                let update = server
                    .pipeline_mut()
                    .handler_mut()
                    .state_mut()
                    .take_policy_update();
                if let Some(policy) = update {
                    info!(origins = ?policy.allow_list(), "Origin policy updated");
                    server.pipeline_mut().replace_policy(policy);
                }
            }
            signal = &mut shutdown => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn client(config: &AppConfig, addr: Option<String>) -> RpcClient {
    RpcClient::new(addr.unwrap_or_else(|| config.client_addr())).with_key(config.api_key.clone())
}

async fn run_call(config: &AppConfig, args: CallArgs) -> Result<()> {
    let params: Map<String, Value> = match &args.params {
        Some(raw) => serde_json::from_str(raw).context("--params must be a JSON object")?,
        None => Map::new(),
    };

    let client = client(config, args.addr);
    let result = client
        .call_versioned(&args.action, args.version, params)
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_import(config: &AppConfig, args: ImportArgs) -> Result<()> {
    let mut jobs = Vec::new();
    if let Some(path) = args.passive {
        jobs.push(ImportJob {
            path,
            deck: args.passive_deck,
            kind: CardKind::Passive,
        });
    }
    if let Some(path) = args.active {
        jobs.push(ImportJob {
            path,
            deck: args.active_deck,
            kind: CardKind::Active,
        });
    }
    if jobs.is_empty() {
        anyhow::bail!("Nothing to import; pass --passive and/or --active");
    }

    let client = client(config, args.addr);
    let version: i64 = client
        .call_no_params("version")
        .await
        .with_context(|| format!("Could not reach server at {}", client.addr()))?;
    info!(version, addr = client.addr(), "Connected");

    let importer = Importer::new(client)?.with_model(args.model);
    for job in &jobs {
        match importer.import_file(job).await {
            Ok(summary) => println!("{} -> {}: {summary}", job.path.display(), job.deck),
            Err(e) => error!(path = %job.path.display(), "Skipping file: {e:#}"),
        }
    }

    Ok(())
}
