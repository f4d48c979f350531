//! # Package metadata
//!
//! Metadata comes from two places, the native sync databases on disk and the remote source repository.
//! Both are exposed through [`MetadataProvider`] and combined by [`MetaDB`],
//! which bounds every call by the lookup timeout and retries transient failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod package;
use package::*;

pub mod iterator;
pub use iterator::{SearchHit, SearchResults};

pub mod desc;
pub mod sync_db;
pub mod aur;

/// A lookup that could not be answered.
///
/// A package that simply doesn't exist is not an error, lookups return `None` or an empty list for those.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
	#[error("{source_name} did not answer within {timeout:?}")]
	Unreachable { source_name: String, timeout: Duration },
	#[error("transient failure querying {source_name}: {message}")]
	Transient { source_name: String, message: String },
	#[error("{source_name} rejected the query: {message}")]
	Rejected { source_name: String, message: String },
}

impl LookupError {
	pub fn is_retryable(&self) -> bool {
		!matches!(self, LookupError::Rejected { .. })
	}
}

/// A source of package metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
	/// Short name used in logs and errors.
	fn name(&self) -> &str;

	async fn lookup(&self, name: &str) -> Result<Option<PackageRecord>, LookupError> {
		let found = self.lookup_many(&[name.to_string()]).await?;
		Ok(found.into_iter().find(|r| r.name == name))
	}

	/// Looks up several names at once. Names that don't exist are left out of the result.
	async fn lookup_many(&self, names: &[String]) -> Result<Vec<PackageRecord>, LookupError>;

	/// Every record that declares `provides = name`.
	async fn providers(&self, name: &str) -> Result<Vec<PackageRecord>, LookupError>;

	async fn search(&self, term: &str) -> Result<SearchResults, LookupError>;
}

#[async_trait]
impl<T: MetadataProvider + ?Sized> MetadataProvider for std::sync::Arc<T> {
	fn name(&self) -> &str {
		(**self).name()
	}

	async fn lookup(&self, name: &str) -> Result<Option<PackageRecord>, LookupError> {
		(**self).lookup(name).await
	}

	async fn lookup_many(&self, names: &[String]) -> Result<Vec<PackageRecord>, LookupError> {
		(**self).lookup_many(names).await
	}

	async fn providers(&self, name: &str) -> Result<Vec<PackageRecord>, LookupError> {
		(**self).providers(name).await
	}

	async fn search(&self, term: &str) -> Result<SearchResults, LookupError> {
		(**self).search(term).await
	}
}

/// Which of the [`MetaDB`] providers to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginKind {
	Native,
	Source,
}

impl std::fmt::Display for OriginKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OriginKind::Native => write!(f, "the native repositories"),
			OriginKind::Source => write!(f, "the source repository"),
		}
	}
}

/// The native and source providers with timeout and retry policy applied.
pub struct MetaDB {
	native: Box<dyn MetadataProvider>,
	source: Box<dyn MetadataProvider>,
	timeout: Duration,
	retries: u32,
	backoff: Duration,
}

impl MetaDB {
	pub fn new(config: &crate::Config, native: Box<dyn MetadataProvider>, source: Box<dyn MetadataProvider>) -> Self {
		Self {
			native,
			source,
			timeout: config.lookup_timeout(),
			retries: config.lookup_retries(),
			backoff: Duration::from_millis(250),
		}
	}

	/// Sets the delay before the first retry, doubled for every following one.
	pub fn with_backoff(mut self, backoff: Duration) -> Self {
		self.backoff = backoff;
		self
	}

	fn provider(&self, origin: OriginKind) -> &dyn MetadataProvider {
		match origin {
			OriginKind::Native => self.native.as_ref(),
			OriginKind::Source => self.source.as_ref(),
		}
	}

	pub async fn lookup(&self, origin: OriginKind, name: &str) -> Result<Option<PackageRecord>, LookupError> {
		let provider = self.provider(origin);
		self.with_retry(provider.name(), || provider.lookup(name)).await
	}

	pub async fn lookup_many(&self, origin: OriginKind, names: &[String]) -> Result<Vec<PackageRecord>, LookupError> {
		if names.is_empty() {
			return Ok(Vec::new());
		}
		let provider = self.provider(origin);
		log::debug!("Looking up {} names in {}", names.len(), provider.name());
		self.with_retry(provider.name(), || provider.lookup_many(names)).await
	}

	pub async fn providers(&self, origin: OriginKind, name: &str) -> Result<Vec<PackageRecord>, LookupError> {
		let provider = self.provider(origin);
		log::debug!("Looking up providers of {} in {}", name, provider.name());
		self.with_retry(provider.name(), || provider.providers(name)).await
	}

	/// Searches both providers, native hits come first.
	pub async fn search(&self, term: &str) -> Result<SearchResults, LookupError> {
		let native = self.with_retry(self.native.name(), || self.native.search(term)).await?;
		let source = self.with_retry(self.source.name(), || self.source.search(term)).await?;
		Ok(native.chain(source))
	}

	/// Runs `f` bounded by the lookup timeout, retrying with exponential backoff.
	async fn with_retry<T, F, Fut>(&self, source_name: &str, f: F) -> Result<T, LookupError>
	where
		F: Fn() -> Fut,
		Fut: Future<Output = Result<T, LookupError>>,
	{
		let mut attempt = 0;
		loop {
			let err = match tokio::time::timeout(self.timeout, f()).await {
				Ok(Ok(v)) => return Ok(v),
				Ok(Err(e)) => e,
				Err(_) => LookupError::Unreachable { source_name: source_name.to_string(), timeout: self.timeout },
			};
			if !err.is_retryable() || attempt >= self.retries {
				log::warn!("Lookup in {} failed after {} attempts: {}", source_name, attempt + 1, err);
				return Err(err);
			}
			let delay = self.backoff * 2u32.saturating_pow(attempt);
			log::debug!("Lookup in {} failed, retrying in {:?}: {}", source_name, delay, err);
			tokio::time::sleep(delay).await;
			attempt += 1;
		}
	}
}
