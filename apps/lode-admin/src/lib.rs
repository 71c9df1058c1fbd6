pub mod cli;
pub mod commands;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use tracing_subscriber::EnvFilter;

use lode_config::{Config, KV_BACKEND_POSTGRES};
use lode_domain::query::SearchLevel;
use lode_storage::{
	db::Db,
	kv::{KvStore, MemoryStore},
	pg_kv::PgStore,
	topology::{MemoryTopology, PgTopology, TopologyStore},
};

#[derive(Debug, Parser)]
#[command(
	version = cli::VERSION,
	rename_all = "kebab",
	styles = cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
	/// Apply the Postgres schema.
	Schema,
	/// List online nodes with their backoff state.
	Nodes,
	/// Resolve the nodes a search at LEVEL would query.
	Select {
		#[arg(long)]
		level: SearchLevel,
		/// Root namespace id. Required below global level.
		#[arg(long)]
		namespace: Option<u64>,
	},
	/// Show the load accumulated on a node set.
	Load {
		#[arg(long, value_delimiter = ',', required = true)]
		nodes: Vec<u64>,
	},
	/// Clear the load accumulated on a node set.
	ResetLoad {
		#[arg(long, value_delimiter = ',', required = true)]
		nodes: Vec<u64>,
	},
	/// Inspect or clear a node's backoff.
	Backoff {
		#[command(subcommand)]
		action: BackoffAction,
	},
	/// Delete expired key-value rows from Postgres.
	PurgeExpired,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum BackoffAction {
	Show {
		#[arg(long)]
		node: u64,
	},
	Clear {
		#[arg(long)]
		node: u64,
	},
}

/// The stores selected by the configuration.
pub struct Stores {
	pub db: Option<Db>,
	pub kv: Arc<dyn KvStore>,
	pub topology: Arc<dyn TopologyStore>,
}
impl Stores {
	pub async fn open(cfg: &Config) -> color_eyre::Result<Self> {
		let Some(postgres) = cfg.storage.postgres.as_ref() else {
			tracing::warn!("No Postgres configured. Using empty in-memory stores.");

			return Ok(Self::memory(Arc::new(MemoryTopology::new())));
		};
		let db = Db::connect(postgres).await?;
		let kv: Arc<dyn KvStore> = if cfg.storage.kv.backend == KV_BACKEND_POSTGRES {
			Arc::new(PgStore::new(db.pool.clone()))
		} else {
			Arc::new(MemoryStore::new())
		};
		let topology: Arc<dyn TopologyStore> = Arc::new(PgTopology::new(db.pool.clone()));

		Ok(Self { db: Some(db), kv, topology })
	}

	pub fn memory(topology: Arc<MemoryTopology>) -> Self {
		let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

		Self { db: None, kv, topology }
	}

	fn db(&self) -> color_eyre::Result<&Db> {
		self.db.as_ref().ok_or_else(|| eyre::eyre!("This command requires storage.postgres."))
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = lode_config::load(&args.config)?;
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let stores = Stores::open(&config).await?;
	let output = commands::execute(&config, &stores, args.command).await?;
	let json = serde_json::to_string_pretty(&output)?;

	println!("{json}");

	Ok(())
}
