//! Metadata backed by the native sync databases, `<pacman_db_path>/sync/<repo>.db`.
//!
//! Each database is a tar archive, normally gzip compressed, with one directory per package holding a `desc` file.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;

use super::*;
use super::desc::Desc;
use super::iterator::SearchHitsExt;
use crate::Error::Parse;

/// Every package of the native repositories, held in memory.
#[derive(Debug, Default)]
pub struct SyncDbProvider {
	packages: HashMap<String, PackageRecord>,
	/// Provided name to the names of packages providing it, in repository order.
	provides: HashMap<String, Vec<String>>,
	/// Package names in repository order.
	order: Vec<String>,
}

/// Reads repository names from a `pacman.conf` in the order they are declared.
pub fn repositories_from_pacman_conf(content: &str) -> Vec<String> {
	content.lines()
		.map(str::trim)
		.filter(|l| l.starts_with('[') && l.ends_with(']'))
		.map(|l| l[1..l.len() - 1].trim().to_string())
		.filter(|s| s != "options")
		.collect()
}

impl SyncDbProvider {
	/// Loads the given repositories from `<db_path>/sync`.
	///
	/// When `repositories` is empty every `*.db` file in the directory is loaded in name order.
	/// Repositories without a database file are skipped with a warning.
	/// When a name appears in several repositories the first one wins.
	pub fn open(db_path: &Path, repositories: &[String]) -> crate::Result<Self> {
		let sync_dir = db_path.join("sync");
		let repositories = if repositories.is_empty() {
			let mut found = std::fs::read_dir(&sync_dir)?
				.filter_map(|e| e.ok())
				.filter_map(|e| {
					let path = e.path();
					if path.extension().map_or(false, |ext| ext == "db") {
						path.file_stem().map(|s| s.to_string_lossy().into_owned())
					} else {
						None
					}
				})
				.collect::<Vec<_>>();
			found.sort();
			found
		} else {
			repositories.to_vec()
		};

		let mut records = Vec::new();
		for repo in &repositories {
			let path = sync_dir.join(format!("{}.db", repo));
			let data = match std::fs::read(&path) {
				Ok(data) => data,
				Err(e) => {
					log::warn!("Skipping repository {}, can't read {}: {}", repo, path.display(), e);
					continue;
				},
			};
			let loaded = Self::read_database(repo, &data)?;
			log::debug!("Loaded {} packages from {}", loaded.len(), repo);
			records.extend(loaded);
		}

		Ok(Self::from_records(records))
	}

	/// Reads a database file, gzip compressed or plain.
	pub fn read_database(repository: &str, data: &[u8]) -> crate::Result<Vec<PackageRecord>> {
		if data.starts_with(&[0x1f, 0x8b]) {
			let gz = flate2::bufread::GzDecoder::new(data);
			Self::read_archive(repository, &mut tar::Archive::new(gz))
		} else {
			Self::read_archive(repository, &mut tar::Archive::new(data))
		}
	}

	pub fn read_archive<R: Read>(repository: &str, archive: &mut tar::Archive<R>) -> crate::Result<Vec<PackageRecord>> {
		let mut descs: HashMap<String, Desc> = HashMap::new();
		let mut order = Vec::<String>::new();

		for e in archive.entries()? {
			let mut e = e.map_err(|_| Parse(format!("{} database entries unreadable", repository)))?;
			if e.size() == 0 {
				continue;
			}

			let path = e.path()?.into_owned();
			let (Some(dir), Some(file)) = (path.parent(), path.file_name()) else { continue };
			if file != "desc" && file != "depends" {
				continue;
			}
			let dir = dir.to_string_lossy().into_owned();

			let mut content = String::new();
			e.read_to_string(&mut content)?;

			match descs.get_mut(&dir) {
				Some(desc) => desc.merge(Desc::parse(&content)),
				None => {
					order.push(dir.clone());
					descs.insert(dir, Desc::parse(&content));
				},
			}
		}

		let mut records = Vec::with_capacity(order.len());
		for dir in order {
			let Some(desc) = descs.remove(&dir) else { continue };
			match desc.into_record(Origin::Native { repository: repository.to_string() }) {
				Ok(r) => records.push(r),
				Err(e) => log::warn!("Couldn't process {} in {}: {}", dir, repository, e),
			}
		}
		Ok(records)
	}

	/// Builds the provider from records already in repository order.
	pub fn from_records(records: impl IntoIterator<Item = PackageRecord>) -> Self {
		let mut db = Self::default();
		for record in records {
			if db.packages.contains_key(&record.name) {
				log::trace!("{} is shadowed by an earlier repository", record);
				continue;
			}
			for p in &record.provides {
				db.provides.entry(p.name.clone()).or_default().push(record.name.clone());
			}
			db.order.push(record.name.clone());
			db.packages.insert(record.name.clone(), record);
		}
		db
	}

	pub fn len(&self) -> usize {
		self.packages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.packages.is_empty()
	}

	/// Names of every package in repository order.
	pub fn package_names(&self) -> impl Iterator<Item = &str> {
		self.order.iter().map(String::as_str)
	}
}

#[async_trait]
impl MetadataProvider for SyncDbProvider {
	fn name(&self) -> &str {
		"sync databases"
	}

	async fn lookup_many(&self, names: &[String]) -> Result<Vec<PackageRecord>, LookupError> {
		Ok(names.iter().filter_map(|n| self.packages.get(n)).cloned().collect())
	}

	async fn providers(&self, name: &str) -> Result<Vec<PackageRecord>, LookupError> {
		Ok(self.provides.get(name)
			.map(|names| names.iter().filter_map(|n| self.packages.get(n)).cloned().collect())
			.unwrap_or_default())
	}

	async fn search(&self, term: &str) -> Result<SearchResults, LookupError> {
		let hits = self.order.iter()
			.filter_map(|n| self.packages.get(n))
			.map(|r| SearchHit {
				name: r.name.clone(),
				version: r.version.clone(),
				description: r.description.clone(),
				repository: r.origin.to_string(),
				popularity: None,
				maintainer: None,
				out_of_date: false,
			})
			.collect::<Vec<_>>();
		Ok(SearchResults::new(hits.into_iter().term_matches(term)))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn build_db(entries: &[(&str, &str)]) -> Vec<u8> {
		let mut builder = tar::Builder::new(Vec::new());
		for (path, content) in entries {
			let mut header = tar::Header::new_gnu();
			header.set_size(content.len() as u64);
			header.set_mode(0o644);
			header.set_cksum();
			builder.append_data(&mut header, path, content.as_bytes()).unwrap();
		}
		let tar = builder.into_inner().unwrap();
		let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
		std::io::Write::write_all(&mut gz, &tar).unwrap();
		gz.finish().unwrap()
	}

	#[test]
	fn gzip_database_is_read() {
		let data = build_db(&[
			("bash-5.2-1/desc", "%NAME%\nbash\n\n%VERSION%\n5.2-1\n\n%PROVIDES%\nsh\n\n"),
			("zsh-5.9-1/desc", "%NAME%\nzsh\n\n%VERSION%\n5.9-1\n\n"),
			("zsh-5.9-1/depends", "%DEPENDS%\npcre\n\n"),
		]);
		let records = SyncDbProvider::read_database("core", &data).unwrap();
		assert_eq!(records.len(), 2);
		assert_eq!(records[1].dependencies.runtime[0].name, "pcre");
		assert_eq!(records[0].origin, Origin::Native { repository: "core".to_string() });
	}

	#[test]
	fn pacman_conf_repositories_keep_order() {
		let conf = "[options]\nHoldPkg = pacman\n\n[core]\nInclude = x\n\n[extra]\nInclude = x\n";
		assert_eq!(repositories_from_pacman_conf(conf), vec!["core", "extra"]);
	}

	fn record(name: &str, repo: &str) -> PackageRecord {
		PackageRecord::new(name, PackageVersion::new("1-1").unwrap(), Origin::Native { repository: repo.to_string() })
	}

	#[tokio::test]
	async fn first_repository_wins() {
		let db = SyncDbProvider::from_records(vec![record("a", "core"), record("a", "extra")]);
		let found = db.lookup("a").await.unwrap().unwrap();
		assert_eq!(found.origin, Origin::Native { repository: "core".to_string() });
		assert_eq!(db.len(), 1);
	}

	#[tokio::test]
	async fn providers_are_indexed() {
		let mut bash = record("bash", "core");
		bash.provides.push(Provide::parse("sh").unwrap());
		let db = SyncDbProvider::from_records(vec![bash, record("zsh", "extra")]);
		let providers = db.providers("sh").await.unwrap();
		assert_eq!(providers.len(), 1);
		assert_eq!(providers[0].name, "bash");
		assert!(db.providers("csh").await.unwrap().is_empty());
	}
}
