use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use solvetrack_api::SolvetrackApi;
use solvetrack_core::{ClassName, Username};
use solvetrack_scraper::FetchConfig;
use solvetrack_store_sqlite::SqliteStore;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "svt")]
#[command(about = "Solvetrack CLI")]
struct Cli {
    #[arg(long, default_value = "./solvetrack.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create score tables for the given classes (idempotent)
    Init(InitArgs),
    /// List known classes
    Classes,
    /// Provision a class roster from a CSV file
    Import(ImportArgs),
    /// Print one class's score table as JSON
    Show(ShowArgs),
    /// Scrape fresh counts for one class and store the deltas
    Update(UpdateArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long = "class", required = true)]
    classes: Vec<String>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long)]
    class: String,
    /// CSV with headers s_no,user_name,roll_no
    #[arg(long)]
    csv: PathBuf,
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[arg(long)]
    class: String,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long)]
    class: String,
    /// Profile URL prefix override (username appended as a path segment)
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    s_no: i64,
    user_name: String,
    roll_no: String,
}

fn with_contract_version(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert(
            "cli_contract_version".to_string(),
            Value::String(CLI_CONTRACT_VERSION.to_string()),
        );
    }
    value
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_class(value: &str) -> Result<ClassName> {
    ClassName::parse(value).context("invalid class name")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Init(args) => run_init(&args, &cli.db),
        Command::Classes => run_classes(&cli.db),
        Command::Import(args) => run_import(&args, &cli.db),
        Command::Show(args) => run_show(&args, &cli.db),
        Command::Update(args) => run_update(args, cli.db).await,
    }
}

fn run_init(args: &InitArgs, db: &Path) -> Result<()> {
    let mut classes = Vec::new();
    for name in &args.classes {
        classes.push(parse_class(name)?);
    }
    let store = SqliteStore::open(db)?;
    store.ensure_schema(&classes)?;
    emit_json(serde_json::json!({
        "initialized": classes.iter().map(ClassName::as_str).collect::<Vec<_>>(),
    }))
}

fn run_classes(db: &Path) -> Result<()> {
    let store = SqliteStore::open(db)?;
    let classes = store.list_classes()?;
    emit_json(serde_json::json!({
        "classes": classes.iter().map(ClassName::as_str).collect::<Vec<_>>(),
    }))
}

fn run_import(args: &ImportArgs, db: &Path) -> Result<()> {
    let class = parse_class(&args.class)?;
    let store = SqliteStore::open(db)?;

    let mut reader = csv::Reader::from_path(&args.csv)
        .with_context(|| format!("failed to open roster {}", args.csv.display()))?;
    let mut imported = 0usize;
    for row in reader.deserialize() {
        let row: RosterRow = row.context("bad roster row")?;
        let username = Username::parse(&row.user_name)
            .with_context(|| format!("bad username on row s_no={}", row.s_no))?;
        store.add_student(&class, row.s_no, &username, &row.roll_no)?;
        imported += 1;
    }

    emit_json(serde_json::json!({
        "class": class.as_str(),
        "imported": imported,
    }))
}

fn run_show(args: &ShowArgs, db: &Path) -> Result<()> {
    let class = parse_class(&args.class)?;
    let store = SqliteStore::open(db)?;
    let rows = store.list_rows(&class)?;
    emit_json(serde_json::json!({
        "class": class.as_str(),
        "rows": serde_json::to_value(&rows)?,
    }))
}

async fn run_update(args: UpdateArgs, db: PathBuf) -> Result<()> {
    let class = parse_class(&args.class)?;
    let mut config = FetchConfig::default();
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }

    let api = SolvetrackApi::new(db, config)?;
    let summary = api.update_class(&class).await?;
    emit_json(serde_json::json!({
        "message": summary.message(),
        "class": summary.class.as_str(),
        "updated": summary.updated,
        "skipped": summary.skipped,
    }))
}
