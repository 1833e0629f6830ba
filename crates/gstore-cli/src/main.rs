#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use config::{CliArgs, Command, Config};
use gstore::{JsqlOp, Operation, PgConnector, PostgresProvider, Query, Record, Schema};
use serde_json::Value;
use telemetry::init_telemetry;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = Config::try_from(args)?;

    init_telemetry()?;

    if let Command::Route { id } = config.command {
        return route(&config, id);
    }

    let provider = Arc::new(open_provider(&config)?);
    let outcome = run(&provider, config.command).await;
    provider.close();
    outcome
}

fn open_provider(config: &Config) -> anyhow::Result<PostgresProvider> {
    let source = std::fs::read_to_string(&config.schema_path)
        .with_context(|| format!("reading schema {}", config.schema_path.display()))?;
    let schema = Schema::from_json(&source)?;
    let connector = PgConnector::new(&config.database_url)?;
    tracing::info!(
        categories = schema.len(),
        shard = config.options.shard.suffix(),
        bits = config.options.shard.bits(),
        "provider configured"
    );
    Ok(PostgresProvider::new(connector, schema, config.options))
}

async fn run(provider: &Arc<PostgresProvider>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Refill => {
            let added = provider.refill_identifiers().await?;
            tracing::info!(added, "identifier pool refilled");
            println!("{added}");
        }
        Command::TakeId => println!("{}", provider.take_id().await?),
        Command::Reclaim { id } => {
            provider.reclaim_identifier(id).await?;
            tracing::info!(id, "identifier reclaimed");
        }
        Command::Get { id } => print_json(&Value::Object(provider.get(id).await?))?,
        Command::Details { id, field } => print_records(provider.get_details(id, &field).await?)?,
        Command::Select {
            category,
            query,
            jsql,
        } => {
            let query = match query {
                Some(text) => Query::try_from(serde_json::from_str::<Value>(&text).context("parsing --query")?)?,
                None => Query::new(),
            };
            let program: Vec<JsqlOp> = match jsql {
                Some(text) => serde_json::from_str(&text).context("parsing --jsql")?,
                None => Vec::new(),
            };
            let mut cursor = provider
                .select(&category, query)
                .enroll(program.into_iter().map(Operation::from));
            print_records(cursor.fetch().await?)?;
        }
        Command::Route { .. } => anyhow::bail!("route is answered without a provider"),
    }
    Ok(())
}

fn route(config: &Config, id: u64) -> anyhow::Result<()> {
    let route = config
        .cluster
        .get(id)
        .context("CLUSTER is empty, nothing to route to")?;
    print_json(&serde_json::json!({
        "server": route.server,
        "suffix": route.suffix,
        "bits": route.depth,
        "sequence": route.offset,
    }))
}

fn print_records(records: Vec<Record>) -> anyhow::Result<()> {
    print_json(&Value::Array(records.into_iter().map(Value::Object).collect()))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
