pub mod access;
pub mod filters;
pub mod query;
pub mod response;

mod error;

pub use error::{Error, Result};
