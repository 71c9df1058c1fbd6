//! Paged cache of search responses.
//!
//! On a miss the backend is asked for every cacheable page at once and each page is stored under
//! its own key with set-if-absent, so concurrent fillers never overwrite each other. Pages past
//! `max_pages` and disabled caching go straight to the backend for the requested page.

use std::{future::Future, sync::Arc};

use serde::{Deserialize, Serialize};
use time::Duration;

use lode_config::SearchCache;
use lode_domain::{
	query::{SearchFilters, SearchMode},
	response::{FileMatch, ParsedResponse},
};
use lode_storage::kv::KvStore;

use crate::Result;

/// The parts of a search that decide its results.
#[derive(Debug, Clone)]
pub struct CacheQuery<'a> {
	pub actor_id: Option<u64>,
	pub query: &'a str,
	pub group_id: Option<u64>,
	pub project_id: Option<u64>,
	pub mode: SearchMode,
	pub filters: SearchFilters,
	pub multi_match: bool,
}
impl CacheQuery<'_> {
	/// blake3 over the canonical JSON of query text, scope ids, mode, match granularity and
	/// sorted filters.
	pub fn fingerprint(&self) -> String {
		let canonical = serde_json::json!({
			"query": self.query,
			"group_id": self.group_id,
			"project_id": self.project_id,
			"search_mode": self.mode.as_str(),
			"multi_match": self.multi_match,
			"filters": self.filters.sorted(),
		});

		blake3::hash(canonical.to_string().as_bytes()).to_hex().to_string()
	}
}

/// One page of results with the totals of the whole search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedPage {
	pub files: Vec<FileMatch>,
	pub file_count: u64,
	pub match_count: u64,
	#[serde(skip)]
	pub from_cache: bool,
}

pub struct ResultCache {
	store: Arc<dyn KvStore>,
	namespace: String,
	settings: SearchCache,
}
impl ResultCache {
	pub fn new(store: Arc<dyn KvStore>, namespace: &str, settings: SearchCache) -> Self {
		Self { store, namespace: namespace.to_string(), settings }
	}

	pub fn key(&self, query: &CacheQuery<'_>, per_page: u32, page: u32) -> String {
		format!(
			"cache:{}:{{{}}}/{}/{per_page}/{page}",
			self.namespace,
			query.actor_id.unwrap_or(0),
			query.fingerprint()
		)
	}

	/// Returns page `page` of `per_page` results.
	///
	/// `block(pages)` must return the first `pages * per_page` results. Its errors are returned
	/// as is and nothing is cached for them.
	pub async fn fetch<F, Fut>(
		&self,
		query: &CacheQuery<'_>,
		page: u32,
		per_page: u32,
		mut block: F,
	) -> Result<CachedPage>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<ParsedResponse>>,
	{
		if !self.settings.enabled || page > self.settings.max_pages {
			let response = block(page).await?;

			return Ok(page_slice(&response, page, per_page));
		}

		let key = self.key(query, per_page, page);

		if let Some(raw) = self.store.get(&key).await? {
			let mut cached: CachedPage = serde_json::from_str(&raw)?;

			cached.from_cache = true;

			tracing::debug!(key, "Search cache hit.");

			return Ok(cached);
		}

		let max_pages = self.settings.max_pages;
		let response = block(max_pages).await?;
		let ttl = Duration::seconds(i64::try_from(self.settings.ttl_secs).unwrap_or(i64::MAX));

		for cached_page in 1..=max_pages {
			let value = serde_json::to_string(&page_slice(&response, cached_page, per_page))?;

			self.store
				.set_if_absent(&self.key(query, per_page, cached_page), &value, Some(ttl))
				.await?;
		}

		tracing::debug!(key, pages = max_pages, "Search cache filled.");

		Ok(page_slice(&response, page, per_page))
	}
}

/// Files of 1-based `page`, with the response totals.
pub fn page_slice(response: &ParsedResponse, page: u32, per_page: u32) -> CachedPage {
	let start = (page.saturating_sub(1) as usize).saturating_mul(per_page as usize);
	let files =
		response.files.iter().skip(start).take(per_page as usize).cloned().collect::<Vec<_>>();

	CachedPage {
		files,
		file_count: response.file_count,
		match_count: response.match_count,
		from_cache: false,
	}
}
