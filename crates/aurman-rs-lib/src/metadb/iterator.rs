use super::package::*;

/// A single search match.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
	pub name: String,
	pub version: PackageVersion,
	pub description: Option<String>,
	/// Repository name or `aur`.
	pub repository: String,
	pub popularity: Option<f64>,
	pub maintainer: Option<String>,
	pub out_of_date: bool,
}

/// Lazy, finite sequence of search hits.
///
/// Items are converted as they are pulled and the sequence can only be walked once.
pub struct SearchResults {
	underlying: Box<dyn Iterator<Item = SearchHit> + Send>,
}

impl SearchResults {
	pub fn new<I>(hits: I) -> Self
	where
		I: Iterator<Item = SearchHit> + Send + 'static,
	{
		Self { underlying: Box::new(hits) }
	}

	pub fn empty() -> Self {
		Self::new(std::iter::empty())
	}

	/// Yields all of `self` then all of `other`.
	pub fn chain(self, other: SearchResults) -> Self {
		Self::new(self.underlying.chain(other.underlying))
	}
}

impl Iterator for SearchResults {
	type Item = SearchHit;

	fn next(&mut self) -> Option<Self::Item> {
		self.underlying.next()
	}
}

impl std::fmt::Debug for SearchResults {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SearchResults").finish_non_exhaustive()
	}
}

pub struct TermMatches<I>
where
	I: Iterator<Item = SearchHit>,
{
	term: String,
	underlying: I,
}

impl<I> Iterator for TermMatches<I>
where
	I: Iterator<Item = SearchHit>,
{
	type Item = SearchHit;

	fn next(&mut self) -> Option<Self::Item> {
		for hit in self.underlying.by_ref() {
			if hit.name.to_lowercase().contains(&self.term) {
				return Some(hit)
			}
			if let Some(description) = &hit.description {
				if description.to_lowercase().contains(&self.term) {
					return Some(hit)
				}
			}
		}
		None
	}
}

pub trait SearchHitsExt: Iterator<Item = SearchHit>
{
	/// Filters to hits whose name or description contains `term`, ignoring case.
	fn term_matches(self, term: &str) -> TermMatches<Self>
	where
		Self: Sized,
	{
		TermMatches { underlying: self, term: term.to_lowercase() }
	}

	/// Collects the hits, most popular first. Hits without a popularity go last in name order.
	fn most_popular_first(self) -> Vec<SearchHit>
	where
		Self: Sized,
	{
		let mut hits = self.collect::<Vec<_>>();
		hits.sort_by(|a, b| {
			let pa = a.popularity.unwrap_or(-1.0);
			let pb = b.popularity.unwrap_or(-1.0);
			pb.total_cmp(&pa).then_with(|| a.name.cmp(&b.name))
		});
		hits
	}
}

impl<I: Iterator<Item = SearchHit>> SearchHitsExt for I {}
