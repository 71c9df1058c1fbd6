pub fn render_schema() -> String {
	expand_includes(include_str!("../../../sql/init.sql"))
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_kv_entries.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_kv_entries.sql")),
				"tables/002_kv_hash_entries.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_kv_hash_entries.sql")),
				"tables/003_search_nodes.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_search_nodes.sql")),
				"tables/004_enabled_namespaces.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_enabled_namespaces.sql")),
				"tables/005_search_replicas.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_search_replicas.sql")),
				"tables/006_search_replica_nodes.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_search_replica_nodes.sql")),
				other => {
					tracing::warn!(include = other, "Unknown schema include skipped.");
				},
			}

			out.push('\n');

			continue;
		}

		out.push_str(line);
		out.push('\n');
	}

	out
}
