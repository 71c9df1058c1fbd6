pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid argument: {message}")]
	InvalidArgument { message: String },
	#[error("Unsupported search level: {level}")]
	UnsupportedSearchLevel { level: String },
	#[error("Client connection error: {message}")]
	ClientConnection { message: String },
	#[error("Node {node_id} is backed off for another {seconds_remaining}s.")]
	Backoff { node_id: u64, seconds_remaining: i64 },
	#[error("Backend response error: {message}")]
	Response { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidArgument { message: message.into() }
	}
}

impl From<lode_storage::Error> for Error {
	fn from(err: lode_storage::Error) -> Self {
		match err {
			lode_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			lode_storage::Error::InvalidArgument(message) => Self::InvalidArgument { message },
			lode_storage::Error::Corrupt(message) => Self::Storage { message },
		}
	}
}

impl From<lode_domain::Error> for Error {
	fn from(err: lode_domain::Error) -> Self {
		match err {
			lode_domain::Error::InvalidArgument(message) => Self::InvalidArgument { message },
			lode_domain::Error::UnsupportedSearchLevel(level) => Self::UnsupportedSearchLevel { level },
			lode_domain::Error::MalformedResponse(message) => Self::Response { message },
		}
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Storage { message: format!("Cached value is not valid JSON: {err}.") }
	}
}
