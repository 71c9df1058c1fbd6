use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// 32-bit numeric repository id written by current index nodes.
pub const REPOSITORY_ID_FIELD: &str = "RepositoryID";
/// Repository name written by older nodes; it holds the project id as text.
pub const REPOSITORY_FIELD: &str = "Repository";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMatch {
	pub line_number: u64,
	pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMatch {
	pub start_line: u64,
	pub content: String,
	pub match_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMatch {
	pub project_id: u64,
	pub path: String,
	pub branches: Vec<String>,
	pub score: f64,
	pub line_matches: Vec<LineMatch>,
	pub chunk_matches: Vec<ChunkMatch>,
}
impl FileMatch {
	/// Matches contributed by this file: chunk match counts when present, otherwise lines.
	pub fn match_count(&self) -> u64 {
		if self.chunk_matches.is_empty() {
			self.line_matches.len() as u64
		} else {
			self.chunk_matches.iter().map(|chunk| chunk.match_count).sum()
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
	pub files: Vec<FileMatch>,
	pub file_count: u64,
	pub match_count: u64,
}

/// Project id of a backend row, or 0 when neither id field is usable.
pub fn extract_project_id(row: &Value) -> u64 {
	let modern = row.get(REPOSITORY_ID_FIELD).and_then(coerce_id).filter(|id| *id != 0);

	modern.or_else(|| row.get(REPOSITORY_FIELD).and_then(coerce_id)).unwrap_or(0)
}

pub fn parse_file_match(row: &Value) -> Result<FileMatch> {
	let path = row
		.get("FileName")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::MalformedResponse("file row is missing FileName.".to_string()))?;
	let branches = row
		.get("Branches")
		.and_then(Value::as_array)
		.map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
		.unwrap_or_default();
	let score = row.get("Score").and_then(Value::as_f64).unwrap_or(0.0);
	let mut line_matches = Vec::new();
	let mut chunk_matches = Vec::new();

	for item in row.get("LineMatches").and_then(Value::as_array).into_iter().flatten() {
		line_matches.push(LineMatch {
			line_number: item.get("LineNumber").and_then(coerce_id).unwrap_or(0),
			line: item.get("Line").and_then(Value::as_str).unwrap_or_default().to_string(),
		});
	}
	for item in row.get("ChunkMatches").and_then(Value::as_array).into_iter().flatten() {
		let start_line = item
			.get("ContentStart")
			.and_then(|start| start.get("LineNumber"))
			.and_then(coerce_id)
			.unwrap_or(0);
		let match_count = item
			.get("Ranges")
			.and_then(Value::as_array)
			.map(|ranges| ranges.len() as u64)
			.unwrap_or(1);

		chunk_matches.push(ChunkMatch {
			start_line,
			content: item.get("Content").and_then(Value::as_str).unwrap_or_default().to_string(),
			match_count,
		});
	}

	Ok(FileMatch {
		project_id: extract_project_id(row),
		path: path.to_string(),
		branches,
		score,
		line_matches,
		chunk_matches,
	})
}

/// Parses a `{"Result": {"Files": [...], "FileCount": n, "MatchCount": n}}` document.
pub fn parse_response(value: &Value) -> Result<ParsedResponse> {
	let result = value
		.get("Result")
		.filter(|result| result.is_object())
		.ok_or_else(|| Error::MalformedResponse("response is missing Result.".to_string()))?;
	let files = match result.get("Files") {
		None | Some(Value::Null) => Vec::new(),
		Some(Value::Array(rows)) => rows.iter().map(parse_file_match).collect::<Result<Vec<_>>>()?,
		Some(_) =>
			return Err(Error::MalformedResponse("Result.Files must be an array.".to_string())),
	};
	let file_count = result.get("FileCount").and_then(coerce_id).unwrap_or(files.len() as u64);
	let match_count = result
		.get("MatchCount")
		.and_then(coerce_id)
		.unwrap_or_else(|| files.iter().map(FileMatch::match_count).sum());

	Ok(ParsedResponse { files, file_count, match_count })
}

// Text is parsed straight to u64. Going through f64 would corrupt ids above 2^53.
fn coerce_id(value: &Value) -> Option<u64> {
	match value {
		Value::Number(number) => number.as_u64().or_else(|| {
			number
				.as_f64()
				.filter(|float| float.fract() == 0.0 && (0.0..9.0e15).contains(float))
				.map(|float| float as u64)
		}),
		Value::String(text) => text.trim().parse::<u64>().ok(),
		_ => None,
	}
}
