use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use gstore::{ProviderOptions, RoutingTree, ShardSuffix};

/// Runtime configuration for the `gstore` binary.
///
/// Connection and identifier settings are read from CLI arguments or
/// environment variables (a `.env` file is honoured). The shard settings
/// must match the ones every other node of the cluster was started with.
#[derive(Parser, Debug, Clone)]
#[command(name = "gstore", version, about = "Operate a gstore node")]
pub struct CliArgs {
    /// Connection string of the node's relational database.
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL", default_value_t = String::from("postgres://localhost/gstore"))]
    pub database_url: String,

    /// Low-order bits every identifier minted by this node ends with.
    ///
    /// Environment variable: `SERVER_SUFFIX`
    #[arg(long, env = "SERVER_SUFFIX", default_value_t = 0)]
    pub server_suffix: u64,

    /// Number of bits `SERVER_SUFFIX` occupies.
    ///
    /// Environment variable: `SERVER_BITMASK_SIZE`
    #[arg(long, env = "SERVER_BITMASK_SIZE", default_value_t = 0)]
    pub server_bitmask_size: u32,

    /// Upper bound on open database connections.
    ///
    /// Environment variable: `MAX_CONNECTIONS`
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: usize,

    /// Number of identifiers a refill restores the pool to.
    ///
    /// Environment variable: `ID_POOL_SIZE`
    #[arg(long, env = "ID_POOL_SIZE", default_value_t = 1000)]
    pub id_pool_size: u64,

    /// Refill only once fewer than this percentage of `ID_POOL_SIZE` is left.
    ///
    /// Environment variable: `REFILL_PERCENT`
    #[arg(long, env = "REFILL_PERCENT", default_value_t = 30)]
    pub refill_percent: u8,

    /// JSON file describing the categories.
    ///
    /// Environment variable: `SCHEMA_PATH`
    #[arg(long, env = "SCHEMA_PATH", default_value = "schema.json")]
    pub schema_path: PathBuf,

    /// Servers of the cluster, comma-separated, in the order they joined.
    ///
    /// Environment variable: `CLUSTER`
    #[arg(long, env = "CLUSTER", value_delimiter = ',')]
    pub cluster: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Top up this node's identifier pool.
    Refill,
    /// Claim one identifier and print it.
    TakeId,
    /// Return an identifier stuck in `Init` to the pool.
    Reclaim { id: u64 },
    /// Print the record with the given identifier.
    Get { id: u64 },
    /// Print the records linked through a `Many` field.
    Details { id: u64, field: String },
    /// Print the records of a category.
    Select {
        category: String,
        /// Conditions as a JSON object, e.g. `{"Born": "< 1500"}`.
        #[arg(long)]
        query: Option<String>,
        /// Further operations as a JSON array of `{"op": ...}` objects.
        #[arg(long)]
        jsql: Option<String>,
    },
    /// Print the server of `CLUSTER` owning an identifier.
    Route { id: u64 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub options: ProviderOptions,
    pub schema_path: PathBuf,
    pub cluster: RoutingTree<String>,
    pub command: Command,
}

impl TryFrom<CliArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_connections == 0 {
            bail!("MAX_CONNECTIONS must be greater than 0");
        }
        if args.id_pool_size == 0 {
            bail!("ID_POOL_SIZE must be greater than 0");
        }
        if args.refill_percent > 100 {
            bail!("REFILL_PERCENT ({}) must be at most 100", args.refill_percent);
        }
        let shard = ShardSuffix::new(args.server_suffix, args.server_bitmask_size)
            .context("SERVER_SUFFIX does not fit SERVER_BITMASK_SIZE")?;

        let mut cluster = RoutingTree::new();
        for (index, server) in args.cluster.into_iter().enumerate() {
            let server = server.trim().to_owned();
            if server.is_empty() {
                bail!("CLUSTER entry {index} is empty");
            }
            cluster.insert(index as u64, server);
        }

        Ok(Self {
            database_url: args.database_url,
            options: ProviderOptions {
                max_connections: args.max_connections,
                shard,
                id_capacity: args.id_pool_size,
                refill_percent: args.refill_percent,
            },
            schema_path: args.schema_path,
            cluster,
            command: args.command,
        })
    }
}
