//! Library error type.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("reqwest error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("parsing error: {0}")]
	Parse(String),
	#[error("validation error: {0}")]
	Validation(String),
	#[error("lookup failed: {0}")]
	Lookup(#[from] crate::metadb::LookupError),
	#[error("{0}")]
	Resolve(#[from] crate::relationship_resolver::ResolveError),
	#[error("install failed: {0}")]
	Install(#[from] crate::native::InstallFailure),
}

impl From<crate::metadb::package::VersionParseError> for Error {
	fn from(value: crate::metadb::package::VersionParseError) -> Self {
		Error::Parse(value.to_string())
	}
}
