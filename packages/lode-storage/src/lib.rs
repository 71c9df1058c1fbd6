pub mod db;
pub mod kv;
pub mod models;
pub mod pg_kv;
pub mod schema;
pub mod topology;

mod error;

pub use error::Error;

use std::{future::Future, pin::Pin};

pub type Result<T, E = Error> = std::result::Result<T, E>;
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) fn to_db_id(id: u64) -> Result<i64> {
	i64::try_from(id).map_err(|_| Error::InvalidArgument(format!("id {id} exceeds bigint range.")))
}

pub(crate) fn from_db_id(id: i64) -> Result<u64> {
	u64::try_from(id).map_err(|_| Error::Corrupt(format!("negative id {id} in topology row.")))
}
