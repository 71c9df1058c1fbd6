mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Dispatch, Kv, Postgres, Search, SearchCache, SearchProtocol, Service, Storage, Topology,
};

use std::{fs, path::Path};

pub const KV_BACKEND_MEMORY: &str = "memory";
pub const KV_BACKEND_POSTGRES: &str = "postgres";
/// Upper bound for every configured duration: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if !matches!(cfg.storage.kv.backend.as_str(), KV_BACKEND_MEMORY | KV_BACKEND_POSTGRES) {
		return Err(Error::UnknownKvBackend { backend: cfg.storage.kv.backend.clone() });
	}
	if cfg.storage.kv.namespace.is_empty() {
		return Err(Error::Validation {
			message: "storage.kv.namespace must be non-empty.".to_string(),
		});
	}
	if cfg.storage.kv.backend == KV_BACKEND_POSTGRES {
		let Some(postgres) = cfg.storage.postgres.as_ref() else {
			return Err(Error::Validation {
				message: "storage.postgres is required when storage.kv.backend is postgres."
					.to_string(),
			});
		};

		if postgres.dsn.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.postgres.dsn must be non-empty.".to_string(),
			});
		}
		if postgres.pool_max_conns == 0 {
			return Err(Error::Validation {
				message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
			});
		}
	}
	if cfg.topology.online_threshold_secs == 0 {
		return Err(Error::Validation {
			message: "topology.online_threshold_secs must be greater than zero.".to_string(),
		});
	}
	if cfg.dispatch.selection_ttl_secs == 0 {
		return Err(Error::Validation {
			message: "dispatch.selection_ttl_secs must be greater than zero.".to_string(),
		});
	}
	if cfg.dispatch.max_backoff_secs == 0 {
		return Err(Error::Validation {
			message: "dispatch.max_backoff_secs must be greater than zero.".to_string(),
		});
	}
	if !cfg.dispatch.load_weight.is_finite() {
		return Err(Error::Validation {
			message: "dispatch.load_weight must be a finite number.".to_string(),
		});
	}
	if cfg.dispatch.load_weight <= 0.0 {
		return Err(Error::Validation {
			message: "dispatch.load_weight must be greater than zero.".to_string(),
		});
	}
	if cfg.search.default_per_page == 0 {
		return Err(Error::Validation {
			message: "search.default_per_page must be greater than zero.".to_string(),
		});
	}
	if cfg.search.max_per_page < cfg.search.default_per_page {
		return Err(Error::Validation {
			message: "search.max_per_page must be at least search.default_per_page.".to_string(),
		});
	}
	if cfg.search.count_limit == 0 {
		return Err(Error::Validation {
			message: "search.count_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.search.cache.max_pages == 0 {
		return Err(Error::Validation {
			message: "search.cache.max_pages must be greater than zero.".to_string(),
		});
	}
	if cfg.search.cache.enabled && cfg.search.cache.ttl_secs == 0 {
		return Err(Error::Validation {
			message: "search.cache.ttl_secs must be greater than zero when the cache is enabled."
				.to_string(),
		});
	}

	for (label, value) in [
		("topology.online_threshold_secs", cfg.topology.online_threshold_secs),
		("dispatch.selection_ttl_secs", cfg.dispatch.selection_ttl_secs),
		("dispatch.max_backoff_secs", cfg.dispatch.max_backoff_secs),
		("search.cache.ttl_secs", cfg.search.cache.ttl_secs),
		("search.protocol.timeout_secs", cfg.search.protocol.timeout_secs),
	] {
		if value > MAX_DURATION_SECS {
			return Err(Error::Validation {
				message: format!("{label} must be at most {MAX_DURATION_SECS} seconds."),
			});
		}
	}

	let protocol = &cfg.search.protocol;

	for (label, value) in [
		("search.protocol.version", u64::from(protocol.version)),
		("search.protocol.timeout_secs", protocol.timeout_secs),
		("search.protocol.file_match_window", u64::from(protocol.file_match_window)),
		("search.protocol.line_match_window", u64::from(protocol.line_match_window)),
		("search.protocol.line_matches_per_file", u64::from(protocol.line_matches_per_file)),
		("search.protocol.chunk_matches_per_file", u64::from(protocol.chunk_matches_per_file)),
	] {
		if value == 0 {
			return Err(Error::Validation { message: format!("{label} must be greater than zero.") });
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.service.log_level = cfg.service.log_level.trim().to_string();
	cfg.storage.kv.backend = cfg.storage.kv.backend.trim().to_ascii_lowercase();
	cfg.storage.kv.namespace = cfg.storage.kv.namespace.trim().to_string();

	if cfg.storage.postgres.as_ref().map(|pg| pg.dsn.trim().is_empty()).unwrap_or(false)
		&& cfg.storage.kv.backend == KV_BACKEND_MEMORY
	{
		cfg.storage.postgres = None;
	}
}
