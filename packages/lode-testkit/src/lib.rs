//! Disposable Postgres databases and topology seeding for integration tests.

mod error;

pub use error::{Error, Result};

use std::{env, future::Future, str::FromStr, thread};

use sqlx::{
	ConnectOptions, Connection, Executor, PgPool,
	postgres::{PgConnectOptions, PgConnection},
};
use time::OffsetDateTime;
use tokio::runtime::Builder;
use uuid::Uuid;

const ADMIN_DATABASES: [&str; 2] = ["postgres", "template1"];

pub struct TestDatabase {
	name: String,
	dsn: String,
	admin_options: PgConnectOptions,
	cleaned: bool,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base_options = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("Failed to parse LODE_PG_DSN: {err}.")))?;
		let (admin_options, mut admin_conn) = connect_admin(&base_options).await?;
		let name = format!("lode_test_{}", Uuid::new_v4().simple());
		let create_sql = format!(r#"CREATE DATABASE "{name}""#);

		admin_conn
			.execute(create_sql.as_str())
			.await
			.map_err(|err| Error::Message(format!("Failed to create test database: {err}.")))?;

		let dsn = base_options.database(&name).to_url_lossy().to_string();

		Ok(Self { name, dsn, admin_options, cleaned: false })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Connection settings for the disposable database.
	pub fn postgres_config(&self) -> lode_config::Postgres {
		lode_config::Postgres { dsn: self.dsn.clone(), pool_max_conns: 4 }
	}

	pub async fn cleanup(mut self) -> Result<()> {
		self.cleanup_inner().await
	}

	async fn cleanup_inner(&mut self) -> Result<()> {
		if self.cleaned {
			return Ok(());
		}

		cleanup_database(&self.name, &self.admin_options).await?;

		self.cleaned = true;

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.cleaned {
			return;
		}

		let name = self.name.clone();
		let admin_options = self.admin_options.clone();
		let cleanup_thread = thread::spawn(move || {
			let runtime = match Builder::new_current_thread().enable_all().build() {
				Ok(runtime) => runtime,
				Err(err) => {
					eprintln!("Test database cleanup failed: {err}.");

					return;
				},
			};

			if let Err(err) = runtime.block_on(cleanup_database(&name, &admin_options)) {
				eprintln!("Test database cleanup failed: {err}.");
			}
		});
		let _ = cleanup_thread.join();
	}
}

pub fn env_dsn() -> Option<String> {
	env::var("LODE_PG_DSN").ok()
}

pub async fn with_test_db<F, Fut, T>(base_dsn: &str, f: F) -> Result<T>
where
	F: FnOnce(&TestDatabase) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut db = TestDatabase::new(base_dsn).await?;
	let result = f(&db).await;

	if let Err(err) = db.cleanup_inner().await {
		eprintln!("Test database cleanup warning: {err}.");

		if result.is_ok() {
			return Err(err);
		}
	}

	result
}

/// Inserts or refreshes a search node row.
pub async fn seed_node(
	pool: &PgPool,
	node_id: i64,
	endpoint: &str,
	last_seen_at: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO search_nodes (node_id, endpoint, last_seen_at)
VALUES ($1, $2, $3)
ON CONFLICT (node_id) DO UPDATE
SET endpoint = EXCLUDED.endpoint,
	last_seen_at = EXCLUDED.last_seen_at",
	)
	.bind(node_id)
	.bind(endpoint)
	.bind(last_seen_at)
	.execute(pool)
	.await?;

	Ok(())
}

pub async fn seed_enabled_namespace(
	pool: &PgPool,
	enabled_namespace_id: i64,
	root_namespace_id: i64,
) -> Result<()> {
	sqlx::query(
		"INSERT INTO enabled_namespaces (enabled_namespace_id, root_namespace_id) VALUES ($1, $2)",
	)
	.bind(enabled_namespace_id)
	.bind(root_namespace_id)
	.execute(pool)
	.await?;

	Ok(())
}

/// Inserts a replica in `state` and assigns it to `node_ids`.
pub async fn seed_replica(
	pool: &PgPool,
	replica_id: i64,
	enabled_namespace_id: i64,
	state: &str,
	node_ids: &[i64],
) -> Result<()> {
	let mut tx = pool.begin().await?;

	sqlx::query(
		"INSERT INTO search_replicas (replica_id, enabled_namespace_id, state) VALUES ($1, $2, $3)",
	)
	.bind(replica_id)
	.bind(enabled_namespace_id)
	.bind(state)
	.execute(&mut *tx)
	.await?;

	for node_id in node_ids {
		sqlx::query("INSERT INTO search_replica_nodes (replica_id, node_id) VALUES ($1, $2)")
			.bind(replica_id)
			.bind(node_id)
			.execute(&mut *tx)
			.await?;
	}

	tx.commit().await?;

	Ok(())
}

async fn connect_admin(
	base_options: &PgConnectOptions,
) -> Result<(PgConnectOptions, PgConnection)> {
	let mut last_err = None;

	for database in ADMIN_DATABASES {
		let options = base_options.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => {
				last_err = Some(err);
			},
		}
	}

	Err(Error::Message(format!("Failed to connect to an admin database: {last_err:?}.")))
}

async fn cleanup_database(name: &str, admin_options: &PgConnectOptions) -> Result<()> {
	let mut conn = PgConnection::connect_with(admin_options).await.map_err(|err| {
		Error::Message(format!("Failed to connect to admin database for cleanup: {err}."))
	})?;
	let drop_sql = format!(r#"DROP DATABASE IF EXISTS "{name}""#);
	let _ = sqlx::query(
		"\
SELECT pg_terminate_backend(pid)
FROM pg_stat_activity
WHERE datname = $1 AND pid <> pg_backend_pid()",
	)
	.bind(name)
	.fetch_all(&mut conn)
	.await;

	sqlx::query(drop_sql.as_str())
		.execute(&mut conn)
		.await
		.map_err(|err| Error::Message(format!("Failed to drop test database: {err}.")))?;

	Ok(())
}
