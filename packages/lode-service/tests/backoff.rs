mod common;

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use lode_service::backoff::{NodeBackoff, expires_in_secs};
use lode_storage::kv::{KvStore, MemoryStore};

fn backoff(store: &Arc<MemoryStore>, node_id: u64) -> NodeBackoff {
	let settings = common::test_config().dispatch;
	let store: Arc<dyn KvStore> = store.clone();

	NodeBackoff::new(store, "test", node_id, &settings)
}

#[test]
fn schedule_doubles_until_the_cap() {
	assert_eq!(expires_in_secs(1, 0.0, 1_800.0), 2.0);
	assert_eq!(expires_in_secs(2, 0.0, 1_800.0), 4.0);
	assert_eq!(expires_in_secs(3, 0.25, 1_800.0), 8.25);
	assert_eq!(expires_in_secs(20, 0.5, 1_800.0), 1_800.0);
	assert_eq!(expires_in_secs(i64::MAX, 0.0, 1_800.0), 1_800.0);

	let mut previous = 0.0;

	for failures in 0..80 {
		let seconds = expires_in_secs(failures, 0.0, 1_800.0);

		assert!(seconds >= previous);
		assert!(seconds <= 1_800.0);

		previous = seconds;
	}
}

#[tokio::test]
async fn backoff_window_grows_with_each_failure() {
	let store = Arc::new(MemoryStore::new());
	let backoff = backoff(&store, 1);
	let now = OffsetDateTime::now_utc();
	let first = backoff.backoff(now).await.expect("Failed to back off.");

	assert_eq!(first, now + Duration::seconds(2));
	assert_eq!(backoff.failures().await.expect("Failed to read failures."), 1);
	assert!(backoff.enabled(now).await.expect("Failed to check backoff."));
	assert_eq!(backoff.seconds_remaining(now).await.expect("Failed to read remaining."), 2);
	assert!(!backoff.enabled(now + Duration::seconds(3)).await.expect("Failed to check backoff."));

	let second = backoff.backoff(now).await.expect("Failed to back off.");

	assert_eq!(second, now + Duration::seconds(4));
	assert_eq!(backoff.failures().await.expect("Failed to read failures."), 2);
}

#[tokio::test]
async fn node_without_failures_is_not_backed_off() {
	let store = Arc::new(MemoryStore::new());
	let backoff = backoff(&store, 1);
	let now = OffsetDateTime::now_utc();

	assert!(!backoff.enabled(now).await.expect("Failed to check backoff."));
	assert_eq!(backoff.seconds_remaining(now).await.expect("Failed to read remaining."), 0);
	assert_eq!(backoff.expires_at().await.expect("Failed to read expiry."), None);
}

#[tokio::test]
async fn remove_backoff_clears_shared_state() {
	let store = Arc::new(MemoryStore::new());
	let backoff = backoff(&store, 1);
	let now = OffsetDateTime::now_utc();

	backoff.backoff(now).await.expect("Failed to back off.");
	backoff.remove_backoff().await.expect("Failed to clear backoff.");

	assert!(!backoff.enabled(now).await.expect("Failed to check backoff."));
	assert_eq!(backoff.failures().await.expect("Failed to read failures."), 0);
	assert_eq!(backoff.expires_at().await.expect("Failed to read expiry."), None);
}

#[tokio::test]
async fn other_instances_observe_the_same_window() {
	let store = Arc::new(MemoryStore::new());
	let now = OffsetDateTime::now_utc();

	backoff(&store, 1).backoff(now).await.expect("Failed to back off.");

	assert!(backoff(&store, 1).enabled(now).await.expect("Failed to check backoff."));
	assert!(!backoff(&store, 2).enabled(now).await.expect("Failed to check backoff."));
}

#[tokio::test]
async fn passed_cached_expiry_reloads_an_extended_window() {
	let store = Arc::new(MemoryStore::new());
	let now = OffsetDateTime::now_utc();
	let local = backoff(&store, 1);
	let remote = backoff(&store, 1);

	local.backoff(now).await.expect("Failed to back off.");
	remote.backoff(now).await.expect("Failed to back off.");

	assert!(local.enabled(now + Duration::seconds(3)).await.expect("Failed to check backoff."));
	assert_eq!(
		local.seconds_remaining(now + Duration::seconds(3)).await.expect("Failed to read remaining."),
		1
	);
}
