//! In-memory collaborators for testing the resolver and orchestrator.
//!
//! Every mock counts the calls made to it and can be told to fail for chosen names.
//! Record helpers panic on malformed input, they are only meant for literals in tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use aurman_rs::installer::{BuildError, BuildTool, FetchError, RecipeFetcher};
use aurman_rs::metadb::{LookupError, MetadataProvider, SearchHit, SearchResults};
use aurman_rs::metadb::package::*;
use aurman_rs::native::{FailureReason, InstallFailure, InstallReason, InstalledPackage, NativePackageManager};

pub fn init_logging() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// Config for tests: no retry delay worth waiting for, short timeouts.
pub fn test_config() -> aurman_rs::Config {
	let mut config = aurman_rs::Config::default();
	config.set_lookup_timeout(Duration::from_secs(5));
	config.set_lookup_retries(2);
	config.set_non_interactive(true);
	config
}

fn version(v: &str) -> PackageVersion {
	PackageVersion::new(v).unwrap_or_else(|e| panic!("bad version {}: {}", v, e))
}

fn refs(deps: &[&str]) -> Vec<PackageRef> {
	deps.iter().map(|d| PackageRef::parse(d).unwrap_or_else(|e| panic!("bad dependency {}: {}", d, e))).collect()
}

/// A record in the source repository, its recipe base is its own name.
pub fn source_record(name: &str, v: &str, depends: &[&str]) -> PackageRecord {
	let mut r = PackageRecord::new(name, version(v), Origin::Source { base: name.to_string() });
	r.dependencies.runtime = refs(depends);
	r
}

/// A native record from the `extra` repository.
pub fn native_record(name: &str, v: &str) -> PackageRecord {
	PackageRecord::new(name, version(v), Origin::Native { repository: "extra".to_string() })
}

pub fn with_build_depends(mut record: PackageRecord, depends: &[&str]) -> PackageRecord {
	record.dependencies.build = refs(depends);
	record
}

pub fn with_provides(mut record: PackageRecord, provides: &[&str]) -> PackageRecord {
	record.provides = provides.iter().map(|p| Provide::parse(p).unwrap_or_else(|e| panic!("bad provide {}: {}", p, e))).collect();
	record
}

pub fn with_base(mut record: PackageRecord, base: &str) -> PackageRecord {
	record.origin = Origin::Source { base: base.to_string() };
	record
}

pub fn installed(name: &str, v: &str) -> InstalledPackage {
	InstalledPackage { name: name.to_string(), version: version(v), provides: Vec::new() }
}

/// Metadata provider answering from a fixed set of records.
#[derive(Default)]
pub struct MockProvider {
	records: Vec<PackageRecord>,
	/// Names whose lookup fails with a transient error every time.
	unreachable: HashSet<String>,
	/// Lookups that fail before the provider starts answering.
	flaky_calls: AtomicUsize,
	pub lookup_calls: AtomicUsize,
	pub provider_calls: AtomicUsize,
	pub looked_up: Mutex<Vec<String>>,
}

impl MockProvider {
	pub fn new(records: impl IntoIterator<Item = PackageRecord>) -> Self {
		Self { records: records.into_iter().collect(), ..Default::default() }
	}

	pub fn with_unreachable(mut self, name: &str) -> Self {
		self.unreachable.insert(name.to_string());
		self
	}

	/// Fails the first `calls` lookups with a transient error.
	pub fn with_flaky_calls(self, calls: usize) -> Self {
		self.flaky_calls.store(calls, Ordering::SeqCst);
		self
	}

	pub fn lookups(&self) -> usize {
		self.lookup_calls.load(Ordering::SeqCst)
	}

	/// Every name passed to a lookup, in call order.
	pub fn looked_up_names(&self) -> Vec<String> {
		self.looked_up.lock().map(|l| l.clone()).unwrap_or_default()
	}

	fn check_failures(&self, names: &[String]) -> Result<(), LookupError> {
		if self.flaky_calls.load(Ordering::SeqCst) > 0 {
			self.flaky_calls.fetch_sub(1, Ordering::SeqCst);
			return Err(LookupError::Transient { source_name: "mock".to_string(), message: "flaky".to_string() });
		}
		if let Some(n) = names.iter().find(|n| self.unreachable.contains(*n)) {
			return Err(LookupError::Transient { source_name: "mock".to_string(), message: format!("{} is unreachable", n) });
		}
		Ok(())
	}
}

#[async_trait]
impl MetadataProvider for MockProvider {
	fn name(&self) -> &str {
		"mock"
	}

	async fn lookup_many(&self, names: &[String]) -> Result<Vec<PackageRecord>, LookupError> {
		self.lookup_calls.fetch_add(1, Ordering::SeqCst);
		if let Ok(mut l) = self.looked_up.lock() {
			l.extend(names.iter().cloned());
		}
		self.check_failures(names)?;
		Ok(self.records.iter().filter(|r| names.contains(&r.name)).cloned().collect())
	}

	async fn providers(&self, name: &str) -> Result<Vec<PackageRecord>, LookupError> {
		self.provider_calls.fetch_add(1, Ordering::SeqCst);
		self.check_failures(&[name.to_string()])?;
		Ok(self.records.iter().filter(|r| r.declares_provide(name)).cloned().collect())
	}

	async fn search(&self, term: &str) -> Result<SearchResults, LookupError> {
		let hits = self.records.iter()
			.filter(|r| r.name.contains(term))
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
		Ok(SearchResults::new(hits.into_iter()))
	}
}

/// One transaction made against a [`MockPackageManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
	/// File names of the installed artifacts.
	Binary(Vec<String>, InstallReason),
	Repo(Vec<String>, InstallReason),
	Remove(Vec<String>),
}

#[derive(Default)]
pub struct MockPackageManager {
	installed: Vec<InstalledPackage>,
	sync_names: HashSet<String>,
	/// Transactions touching any of these names fail.
	failing: HashSet<String>,
	pub transactions: Mutex<Vec<Transaction>>,
}

impl MockPackageManager {
	pub fn new(installed: impl IntoIterator<Item = InstalledPackage>) -> Self {
		Self { installed: installed.into_iter().collect(), ..Default::default() }
	}

	pub fn with_sync_packages(mut self, names: &[&str]) -> Self {
		self.sync_names = names.iter().map(|n| n.to_string()).collect();
		self
	}

	pub fn failing_on(mut self, name: &str) -> Self {
		self.failing.insert(name.to_string());
		self
	}

	pub fn transactions(&self) -> Vec<Transaction> {
		self.transactions.lock().map(|t| t.clone()).unwrap_or_default()
	}

	fn record(&self, transaction: Transaction, names: &[String]) -> Result<(), InstallFailure> {
		if let Ok(mut t) = self.transactions.lock() {
			t.push(transaction);
		}
		match names.iter().find(|n| self.failing.iter().any(|f| *n == f || n.starts_with(&format!("{}-", f)))) {
			Some(n) => Err(InstallFailure {
				operation: "mock transaction".to_string(),
				reason: FailureReason::ExitCode(1),
				output: format!("error: failed to commit transaction ({})", n),
			}),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl NativePackageManager for MockPackageManager {
	async fn installed_package(&self, name: &str) -> Option<InstalledPackage> {
		self.installed.iter().find(|p| p.name == name).cloned()
	}

	async fn installed_providers(&self, name: &str) -> Vec<InstalledPackage> {
		self.installed.iter().filter(|p| p.provides.iter().any(|pr| pr.name == name)).cloned().collect()
	}

	async fn installed_packages(&self) -> Vec<InstalledPackage> {
		self.installed.clone()
	}

	async fn foreign_packages(&self) -> Vec<InstalledPackage> {
		self.installed.iter().filter(|p| !self.sync_names.contains(&p.name)).cloned().collect()
	}

	async fn install_binary(&self, artifacts: &[PathBuf], reason: InstallReason) -> Result<(), InstallFailure> {
		let files = artifacts.iter()
			.filter_map(|a| a.file_name())
			.map(|f| f.to_string_lossy().into_owned())
			.collect::<Vec<_>>();
		self.record(Transaction::Binary(files.clone(), reason), &files)
	}

	async fn install_from_repo(&self, names: &[String], reason: InstallReason) -> Result<(), InstallFailure> {
		self.record(Transaction::Repo(names.to_vec(), reason), names)
	}

	async fn remove(&self, names: &[String]) -> Result<(), InstallFailure> {
		self.record(Transaction::Remove(names.to_vec()), names)
	}
}

/// Pretends to fetch recipes into `<root>/<base>`.
pub struct MockFetcher {
	root: PathBuf,
	failing: HashSet<String>,
	delay: Duration,
	pub fetched: Mutex<Vec<String>>,
	pub cleaned: Mutex<Vec<String>>,
	pub in_flight: AtomicUsize,
	pub max_in_flight: AtomicUsize,
}

impl MockFetcher {
	pub fn new(root: &Path) -> Self {
		Self {
			root: root.to_path_buf(),
			failing: HashSet::new(),
			delay: Duration::ZERO,
			fetched: Mutex::new(Vec::new()),
			cleaned: Mutex::new(Vec::new()),
			in_flight: AtomicUsize::new(0),
			max_in_flight: AtomicUsize::new(0),
		}
	}

	pub fn failing_on(mut self, base: &str) -> Self {
		self.failing.insert(base.to_string());
		self
	}

	/// Makes every fetch take `delay`, for observing concurrency.
	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;
		self
	}

	pub fn fetches(&self) -> Vec<String> {
		self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
	}

	pub fn cleans(&self) -> Vec<String> {
		self.cleaned.lock().map(|c| c.clone()).unwrap_or_default()
	}
}

#[async_trait]
impl RecipeFetcher for MockFetcher {
	async fn fetch_or_update(&self, base: &str) -> Result<PathBuf, FetchError> {
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);
		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
		self.in_flight.fetch_sub(1, Ordering::SeqCst);

		if let Ok(mut f) = self.fetched.lock() {
			f.push(base.to_string());
		}
		let dir = self.root.join(base);
		if self.failing.contains(base) {
			return Err(FetchError::MissingRecipe(dir));
		}
		Ok(dir)
	}

	async fn clean(&self, base: &str) -> Result<(), FetchError> {
		if let Ok(mut c) = self.cleaned.lock() {
			c.push(base.to_string());
		}
		Ok(())
	}
}

/// Produces `<name>-1.0-1-x86_64.pkg.tar.zst` for each package of a recipe.
#[derive(Default)]
pub struct MockBuildTool {
	/// Recipe base to the packages it builds, the base alone when absent.
	split: HashMap<String, Vec<String>>,
	failing: HashSet<String>,
	pub built: Mutex<Vec<String>>,
}

impl MockBuildTool {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_split(mut self, base: &str, packages: &[&str]) -> Self {
		self.split.insert(base.to_string(), packages.iter().map(|p| p.to_string()).collect());
		self
	}

	pub fn failing_on(mut self, base: &str) -> Self {
		self.failing.insert(base.to_string());
		self
	}

	pub fn builds(&self) -> Vec<String> {
		self.built.lock().map(|b| b.clone()).unwrap_or_default()
	}
}

#[async_trait]
impl BuildTool for MockBuildTool {
	async fn build(&self, recipe_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
		let base = recipe_dir.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
		if let Ok(mut b) = self.built.lock() {
			b.push(base.clone());
		}
		if self.failing.contains(&base) {
			return Err(BuildError::Failed {
				program: "makepkg".to_string(),
				reason: FailureReason::ExitCode(4),
				diagnostic: format!("==> ERROR: A failure occurred in build().\n    Aborting {}...", base),
			});
		}
		let packages = self.split.get(&base).cloned().unwrap_or_else(|| vec![base.clone()]);
		Ok(packages.iter().map(|p| recipe_dir.join(format!("{}-1.0-1-x86_64.pkg.tar.zst", p))).collect())
	}
}
