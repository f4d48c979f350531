//! Metadata from the AUR RPC interface, version 5.
//!
//! `info` requests are batched and issued concurrently, see [`AurProvider::lookup_many`].

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::Deserialize;

use super::*;

/// Names per `info` request, keeps the query string within common URL length limits.
const INFO_CHUNK_SIZE: usize = 150;

/// The AUR refuses shorter search terms.
const MIN_SEARCH_LENGTH: usize = 2;

#[derive(Debug, Deserialize)]
struct RpcResponse {
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	results: Vec<AurPackage>,
	error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AurPackage {
	name: String,
	version: String,
	description: Option<String>,
	package_base: String,
	#[serde(default)]
	depends: Vec<String>,
	#[serde(default)]
	make_depends: Vec<String>,
	#[serde(default)]
	check_depends: Vec<String>,
	#[serde(default)]
	opt_depends: Vec<String>,
	#[serde(default)]
	provides: Vec<String>,
	#[serde(default)]
	conflicts: Vec<String>,
	#[serde(default)]
	popularity: f64,
	maintainer: Option<String>,
	out_of_date: Option<i64>,
}

fn parse_refs(package: &str, field: &str, values: Vec<String>) -> Vec<PackageRef> {
	values.into_iter()
		.filter_map(|s| match PackageRef::parse(&s) {
			Ok(r) => Some(r),
			Err(e) => {
				log::warn!("Skipping {} entry \"{}\" of {}: {}", field, s, package, e);
				None
			},
		})
		.collect()
}

impl AurPackage {
	fn into_record(self) -> Option<PackageRecord> {
		let version = match PackageVersion::new(&self.version) {
			Ok(v) => v,
			Err(e) => {
				log::warn!("Ignoring AUR package {}: {}", self.name, e);
				return None
			},
		};

		let mut build = parse_refs(&self.name, "makedepends", self.make_depends);
		build.extend(parse_refs(&self.name, "checkdepends", self.check_depends));

		let dependencies = Dependencies {
			runtime: parse_refs(&self.name, "depends", self.depends),
			build,
			optional: parse_refs(&self.name, "optdepends", self.opt_depends),
		};
		let conflicts = parse_refs(&self.name, "conflicts", self.conflicts);
		let provides = self.provides.iter()
			.filter_map(|s| Provide::parse(s).ok())
			.collect();

		Some(PackageRecord {
			name: self.name,
			version,
			origin: Origin::Source { base: self.package_base },
			description: self.description,
			dependencies,
			provides,
			conflicts,
		})
	}

	fn into_hit(self) -> Option<SearchHit> {
		let version = PackageVersion::new(&self.version).ok()?;
		Some(SearchHit {
			name: self.name,
			version,
			description: self.description,
			repository: "aur".to_string(),
			popularity: Some(self.popularity),
			maintainer: self.maintainer,
			out_of_date: self.out_of_date.is_some(),
		})
	}
}

/// Remote-API-backed provider for the source repository.
pub struct AurProvider {
	client: reqwest::Client,
	rpc_url: String,
	max_concurrent: usize,
	timeout: std::time::Duration,
}

impl AurProvider {
	/// # Errors
	/// - [`Reqwest`](crate::Error::Reqwest) when the HTTP client can't be built.
	pub fn new(config: &crate::Config) -> crate::Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(config.lookup_timeout())
			.https_only(config.https_only())
			.user_agent(concat!("aurman-rs/", env!("CARGO_PKG_VERSION")))
			.build()?;
		Ok(Self {
			client,
			rpc_url: format!("{}/rpc/", config.aur_url().trim_end_matches('/')),
			max_concurrent: config.parallel_fetch_limit(),
			timeout: config.lookup_timeout(),
		})
	}

	fn map_reqwest_error(&self, e: reqwest::Error) -> LookupError {
		if e.is_timeout() {
			LookupError::Unreachable { source_name: self.name().to_string(), timeout: self.timeout }
		} else if e.is_status() && e.status().map_or(false, |s| s.is_client_error() && s.as_u16() != 429) {
			LookupError::Rejected { source_name: self.name().to_string(), message: e.to_string() }
		} else {
			LookupError::Transient { source_name: self.name().to_string(), message: e.to_string() }
		}
	}

	async fn query(&self, params: &[(&str, &str)]) -> Result<Vec<AurPackage>, LookupError> {
		log::trace!("AUR query {:?}", params);
		let response = self.client
			.get(&self.rpc_url)
			.query(&[("v", "5")])
			.query(params)
			.send().await
			.and_then(|r| r.error_for_status())
			.map_err(|e| self.map_reqwest_error(e))?;

		let response = response.json::<RpcResponse>().await
			.map_err(|e| LookupError::Transient { source_name: self.name().to_string(), message: e.to_string() })?;

		if response.kind == "error" {
			return Err(LookupError::Rejected {
				source_name: self.name().to_string(),
				message: response.error.unwrap_or_else(|| "unknown error".to_string()),
			});
		}
		Ok(response.results)
	}

	async fn info(&self, names: &[String]) -> Result<Vec<PackageRecord>, LookupError> {
		let mut params = vec![("type", "info")];
		params.extend(names.iter().map(|n| ("arg[]", n.as_str())));
		let packages = self.query(&params).await?;
		Ok(packages.into_iter().filter_map(AurPackage::into_record).collect())
	}
}

#[async_trait]
impl MetadataProvider for AurProvider {
	fn name(&self) -> &str {
		"aur"
	}

	/// Splits `names` into chunks and requests them concurrently, at most `parallel_fetch_limit` at a time.
	async fn lookup_many(&self, names: &[String]) -> Result<Vec<PackageRecord>, LookupError> {
		let requests = names.chunks(INFO_CHUNK_SIZE).map(|chunk| self.info(chunk)).collect::<Vec<_>>();
		let results = stream::iter(requests)
			.buffer_unordered(self.max_concurrent)
			.collect::<Vec<_>>()
			.await;

		let mut records = Vec::with_capacity(names.len());
		for result in results {
			records.extend(result?);
		}
		Ok(records)
	}

	async fn providers(&self, name: &str) -> Result<Vec<PackageRecord>, LookupError> {
		let found = self.query(&[("type", "search"), ("by", "provides"), ("arg", name)]).await?;
		let names = found.into_iter()
			.map(|p| p.name)
			.filter(|n| n != name)
			.collect::<Vec<_>>();
		let records = self.lookup_many(&names).await?;
		Ok(records.into_iter().filter(|r| r.declares_provide(name)).collect())
	}

	async fn search(&self, term: &str) -> Result<SearchResults, LookupError> {
		if term.chars().count() < MIN_SEARCH_LENGTH {
			return Err(LookupError::Rejected {
				source_name: self.name().to_string(),
				message: format!("search terms must be at least {} characters", MIN_SEARCH_LENGTH),
			});
		}
		let found = self.query(&[("type", "search"), ("by", "name-desc"), ("arg", term)]).await?;
		Ok(SearchResults::new(found.into_iter().filter_map(AurPackage::into_hit)))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	const INFO: &str = r#"{
		"version": 5, "type": "multiinfo", "resultcount": 1,
		"results": [{
			"Name": "yay", "PackageBase": "yay", "Version": "12.3.5-1",
			"Description": "Yet another yogurt", "Popularity": 21.5, "Maintainer": "jguer", "OutOfDate": null,
			"Depends": ["pacman>6.1", "git"], "MakeDepends": ["go>=1.21"], "CheckDepends": ["bats"],
			"OptDepends": ["sudo: privilege elevation"], "Provides": ["yay-bin=12.3.5"], "Conflicts": ["yay-bin"]
		}]
	}"#;

	#[test]
	fn info_response_converts_to_record() {
		let response: RpcResponse = serde_json::from_str(INFO).unwrap();
		assert_eq!(response.kind, "multiinfo");
		let record = response.results.into_iter().next().unwrap().into_record().unwrap();
		assert_eq!(record.name, "yay");
		assert_eq!(record.origin, Origin::Source { base: "yay".to_string() });
		assert_eq!(record.dependencies.runtime.len(), 2);
		assert_eq!(record.dependencies.build.len(), 2);
		assert_eq!(record.dependencies.optional[0].name, "sudo");
		assert!(record.declares_provide("yay-bin"));
	}

	#[test]
	fn search_result_without_dependencies_parses() {
		let json = r#"{"version":5,"type":"search","resultcount":1,"results":[
			{"Name":"paru","PackageBase":"paru","Version":"2.0.3-1","Description":null,"Popularity":9.1,"Maintainer":null,"OutOfDate":1700000000}
		]}"#;
		let response: RpcResponse = serde_json::from_str(json).unwrap();
		let hit = response.results.into_iter().next().unwrap().into_hit().unwrap();
		assert!(hit.out_of_date);
		assert_eq!(hit.popularity, Some(9.1));
	}

	#[test]
	fn error_response_parses() {
		let response: RpcResponse = serde_json::from_str(r#"{"version":5,"type":"error","resultcount":0,"results":[],"error":"Too many package results."}"#).unwrap();
		assert_eq!(response.kind, "error");
		assert_eq!(response.error.as_deref(), Some("Too many package results."));
	}
}
