use anyhow::{Context as AnyhowContext, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use sift_cli::{app, http_api, SiftConfig};
use sift_protocol::{query_request_schema, ErrorEnvelope, QueryFilters, QueryRequest, DEFAULT_TOP_K};
use sift_search::QueryError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_FAILURE: u8 = 1;
const EXIT_INVALID_REQUEST: u8 = 2;
const EXIT_UNAVAILABLE: u8 = 3;

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Hybrid vector + keyword retrieval over document collections", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (overrides SIFT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a JSON-lines document file and persist the index
    Index(IndexArgs),

    /// Run one query against a persisted index
    Query(QueryArgs),

    /// Show index header, chunk counts and the category histogram
    Stats(StatsArgs),

    /// Serve the query interface over HTTP (POST /query)
    Serve(ServeArgs),

    /// Print the JSON schema of a query request
    Schema,
}

#[derive(Args)]
struct IndexArgs {
    /// Documents file, one JSON object per line
    #[arg(long)]
    input: PathBuf,

    /// Index directory (created or extended)
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct QueryArgs {
    /// Index directory
    #[arg(long)]
    index: PathBuf,

    /// Number of results
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Only chunks of this category (case-insensitive)
    #[arg(long)]
    category: Option<String>,

    /// Earliest document date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Latest document date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Query text
    text: String,
}

#[derive(Args)]
struct StatsArgs {
    /// Index directory
    #[arg(long)]
    index: PathBuf,
}

#[derive(Args)]
struct ServeArgs {
    /// Index directory
    #[arg(long)]
    index: PathBuf,

    /// Bind address, e.g. 127.0.0.1:7700
    #[arg(long, default_value = "127.0.0.1:7700")]
    bind: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if matches!(cli.command, Commands::Schema) {
        println!("{}", query_request_schema()?);
        return Ok(ExitCode::SUCCESS);
    }

    let config = SiftConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Index(args) => run_index(&config, args).await,
        Commands::Query(args) => run_query(&config, args).await,
        Commands::Stats(args) => run_stats(&config, args).await,
        Commands::Serve(args) => run_serve(&config, args).await,
        Commands::Schema => Ok(ExitCode::SUCCESS),
    }
}

async fn run_index(config: &SiftConfig, args: IndexArgs) -> Result<ExitCode> {
    let stats = app::index_documents(config, &args.input, &args.out).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_query(config: &SiftConfig, args: QueryArgs) -> Result<ExitCode> {
    let indexes = app::open_index(config, &args.index).await?;
    let engine = app::build_engine(config, indexes)?;

    let mut filters = QueryFilters::default();
    if let Some(category) = args.category {
        filters = filters.category(category);
    }
    if args.from.is_some() || args.to.is_some() {
        filters = filters.date_range(args.from, args.to);
    }
    let request = QueryRequest::new(args.text, args.top_k).with_filters(filters);

    match engine.respond(&request).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let envelope = ErrorEnvelope::new(err.code(), err.to_string());
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            eprintln!("Error: {err}");
            Ok(ExitCode::from(exit_code_for(&err)))
        }
    }
}

async fn run_stats(config: &SiftConfig, args: StatsArgs) -> Result<ExitCode> {
    let summary = app::summarize_index(config, &args.index).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_serve(config: &SiftConfig, args: ServeArgs) -> Result<ExitCode> {
    let indexes = app::open_index(config, &args.index).await?;
    let engine = Arc::new(app::build_engine(config, indexes)?);
    http_api::serve(engine, &args.bind)
        .await
        .with_context(|| format!("HTTP server on {} failed", args.bind))?;
    Ok(ExitCode::SUCCESS)
}

const fn exit_code_for(err: &QueryError) -> u8 {
    if err.is_invalid_request() {
        EXIT_INVALID_REQUEST
    } else if matches!(err, QueryError::NoRetrievalPath { .. }) {
        EXIT_UNAVAILABLE
    } else {
        EXIT_FAILURE
    }
}
