use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub topology: Topology,
	#[serde(default)]
	pub dispatch: Dispatch,
	pub search: Search,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Option<Postgres>,
	pub kv: Kv,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Kv {
	/// Either "memory" (single process) or "postgres" (shared across handler processes).
	pub backend: String,
	/// Prefix for every key written by the dispatch layer.
	#[serde(default = "default_kv_namespace")]
	pub namespace: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Topology {
	/// A node whose last heartbeat is older than this is treated as offline.
	pub online_threshold_secs: u64,
}
impl Default for Topology {
	fn default() -> Self {
		Self { online_threshold_secs: 60 }
	}
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Dispatch {
	pub selection_ttl_secs: u64,
	pub max_backoff_secs: u64,
	pub max_jitter_ms: u64,
	pub load_weight: f64,
}
impl Default for Dispatch {
	fn default() -> Self {
		Self {
			selection_ttl_secs: 300,
			max_backoff_secs: 1_800,
			max_jitter_ms: 1_000,
			load_weight: 1.0,
		}
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct Search {
	pub default_per_page: u32,
	pub max_per_page: u32,
	pub count_limit: u64,
	/// Scope group searches by traversal-id meta filters instead of repo-id lists.
	#[serde(default = "default_true")]
	pub traversal_id_queries: bool,
	pub cache: SearchCache,
	#[serde(default)]
	pub protocol: SearchProtocol,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchCache {
	pub enabled: bool,
	pub ttl_secs: u64,
	pub max_pages: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchProtocol {
	pub version: u32,
	pub timeout_secs: u64,
	pub context_lines: u32,
	pub file_match_window: u32,
	pub line_match_window: u32,
	pub line_match_results: u32,
	pub line_matches_per_file: u32,
	pub chunk_matches_per_file: u32,
}
impl Default for SearchProtocol {
	fn default() -> Self {
		Self {
			version: 2,
			timeout_secs: 120,
			context_lines: 1,
			file_match_window: 40_000,
			line_match_window: 20_000,
			line_match_results: 5_000,
			line_matches_per_file: 50,
			chunk_matches_per_file: 20,
		}
	}
}

fn default_kv_namespace() -> String {
	"lode".to_string()
}

fn default_true() -> bool {
	true
}
