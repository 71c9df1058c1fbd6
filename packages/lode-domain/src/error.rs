pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Unsupported search level: {0}")]
	UnsupportedSearchLevel(String),
	#[error("Malformed backend response: {0}")]
	MalformedResponse(String),
}
