//! Carries out a [`BuildPlan`].
//!
//! Recipes are fetched ahead of time, up to `parallel_fetch_limit` at once, while builds and installs
//! run one at a time in plan order. Only the sequential side ever touches the native package database.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::native::NativePackageManager;
use crate::relationship_resolver::{Action, BuildPlan, PlanEntry};

pub mod build_tool;
pub use build_tool::{BuildError, BuildTool, Makepkg};
pub mod report;
pub use report::{BuildReport, ReportEntry, TaskOutcome};
pub mod retrieval;
pub use retrieval::{FetchError, GitFetcher, RecipeFetcher};
pub mod task;
pub use task::{BuildTask, TaskError, TaskStatus};

type Fetched = (String, Result<PathBuf, FetchError>);

/// Where a source entry gets its package files from.
enum Recipe {
	Fetched(Result<PathBuf, FetchError>),
	/// Another package of the same split recipe was already built.
	Built(Vec<PathBuf>),
}

/// State of the sequential side of a run.
#[derive(Default)]
struct Progress {
	fetched: HashMap<String, Result<PathBuf, FetchError>>,
	built: HashMap<String, Vec<PathBuf>>,
	/// Recipe bases that failed to fetch or build, to the entry that failed.
	failed_bases: HashMap<String, String>,
	/// Entries that failed or were skipped.
	broken: HashSet<String>,
}

pub struct Orchestrator<'a> {
	fetcher: &'a dyn RecipeFetcher,
	build_tool: &'a dyn BuildTool,
	package_manager: &'a dyn NativePackageManager,
	parallel_fetch_limit: usize,
	continue_on_failure: bool,
	clean_after_build: bool,
	cancellation: CancellationToken,
}

impl<'a> Orchestrator<'a> {
	pub fn new(config: &crate::Config, fetcher: &'a dyn RecipeFetcher, build_tool: &'a dyn BuildTool, package_manager: &'a dyn NativePackageManager) -> Self {
		Self {
			fetcher,
			build_tool,
			package_manager,
			parallel_fetch_limit: config.parallel_fetch_limit().max(1),
			continue_on_failure: config.continue_on_failure(),
			clean_after_build: config.clean_after_build(),
			cancellation: CancellationToken::new(),
		}
	}

	/// Stops the run once `token` is cancelled. The step in progress finishes, the rest are not attempted.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = token;
		self
	}

	/// Runs every entry of `plan`. Never fails as a whole, per entry failures are in the report.
	pub async fn run(&self, plan: &BuildPlan) -> BuildReport {
		let mut bases = Vec::<String>::new();
		for base in plan.iter().filter_map(PlanEntry::recipe_base) {
			if !bases.iter().any(|b| b == base) {
				bases.push(base.to_string());
			}
		}

		let (tx, rx) = mpsc::channel::<Fetched>(bases.len().max(1));
		let prefetch = self.cancellation.child_token();

		let producer = self.prefetch(bases, tx, prefetch.clone());
		let consumer = async {
			let report = self.execute(plan, rx).await;
			prefetch.cancel();
			report
		};
		let (_, report) = tokio::join!(producer, consumer);

		log::info!("{}", report);
		report
	}

	/// Fetches recipes in plan order, at most `parallel_fetch_limit` at a time.
	async fn prefetch(&self, bases: Vec<String>, tx: mpsc::Sender<Fetched>, token: CancellationToken) {
		let fetcher = self.fetcher;
		let fetches = stream::iter(bases)
			.map(|base| async move {
				let result = fetcher.fetch_or_update(&base).await;
				(base, result)
			})
			.buffered(self.parallel_fetch_limit);
		let mut fetches = std::pin::pin!(fetches);

		loop {
			tokio::select! {
				_ = token.cancelled() => {
					log::debug!("Prefetching stopped");
					break;
				},
				next = fetches.next() => match next {
					Some(fetched) => if tx.send(fetched).await.is_err() { break },
					None => break,
				},
			}
		}
	}

	/// Waits for the recipe of `base`, `None` when prefetching stopped before it.
	async fn wait_for_fetch(base: &str, rx: &mut mpsc::Receiver<Fetched>, progress: &mut Progress) -> Option<Result<PathBuf, FetchError>> {
		loop {
			if let Some(result) = progress.fetched.remove(base) {
				return Some(result);
			}
			let (b, result) = rx.recv().await?;
			progress.fetched.insert(b, result);
		}
	}

	async fn execute(&self, plan: &BuildPlan, mut rx: mpsc::Receiver<Fetched>) -> BuildReport {
		let entries = plan.entries();
		let mut outcomes = entries.iter().map(|_| None).collect::<Vec<Option<TaskOutcome>>>();
		let mut progress = Progress::default();
		let mut cancelled = false;

		let mut last_use = HashMap::<&str, usize>::new();
		for (i, e) in entries.iter().enumerate() {
			if let Some(base) = e.recipe_base() {
				last_use.insert(base, i);
			}
		}

		let mut i = 0;
		while i < entries.len() {
			if self.cancellation.is_cancelled() {
				log::warn!("Cancelled, {} entries left", entries.len() - i);
				cancelled = true;
				break;
			}
			let entry = &entries[i];

			if let Some(dep) = entry.depends_on.iter().find(|d| progress.broken.contains(*d)) {
				log::warn!("Skipping {}, {} failed", entry.name, dep);
				outcomes[i] = Some(TaskOutcome::Skipped { failed_dependency: dep.clone() });
				progress.broken.insert(entry.name.clone());
				/* A sibling may have built the recipe already */
				if let Some(base) = entry.recipe_base() {
					if self.clean_after_build && last_use.get(base) == Some(&i) && progress.built.contains_key(base) {
						self.clean(base).await;
					}
				}
				i += 1;
				continue;
			}

			let mut failed = false;
			match entry.action {
				Action::Skip => {
					log::debug!("{} {} is up to date", entry.name, entry.version);
					outcomes[i] = Some(TaskOutcome::UpToDate);
					i += 1;
				},
				Action::InstallBinary => {
					let batch = entries[i..].iter()
						.take_while(|e| e.action == Action::InstallBinary && e.reason == entry.reason)
						.take_while(|e| !e.depends_on.iter().any(|d| progress.broken.contains(d)))
						.count()
						.max(1);
					let names = entries[i..i + batch].iter().map(|e| e.name.clone()).collect::<Vec<_>>();

					log::info!("[{}/{}] Installing {}", i + 1, entries.len(), names.join(" "));
					match self.package_manager.install_from_repo(&names, entry.reason).await {
						Ok(()) => {
							for n in i..i + batch {
								outcomes[n] = Some(TaskOutcome::Installed);
							}
						},
						Err(failure) => {
							failed = true;
							for n in i..i + batch {
								progress.broken.insert(entries[n].name.clone());
								outcomes[n] = Some(TaskOutcome::Failed(TaskError::Install(failure.clone())));
							}
						},
					}
					i += batch;
				},
				Action::BuildFromSource => {
					let base = entry.recipe_base().unwrap_or(&entry.name).to_string();

					if let Some(failed_sibling) = progress.failed_bases.get(&base) {
						log::warn!("Skipping {}, {} from the same recipe failed", entry.name, failed_sibling);
						outcomes[i] = Some(TaskOutcome::Skipped { failed_dependency: failed_sibling.clone() });
						progress.broken.insert(entry.name.clone());
						i += 1;
						continue;
					}

					let recipe = match progress.built.get(&base) {
						Some(artifacts) => Recipe::Built(artifacts.clone()),
						None => match Self::wait_for_fetch(&base, &mut rx, &mut progress).await {
							Some(result) => Recipe::Fetched(result),
							None => {
								cancelled = true;
								break;
							},
						},
					};

					log::info!("[{}/{}] Building {} {}", i + 1, entries.len(), entry.name, entry.version);
					let mut task = BuildTask::new(&entry.name, entry.action);
					match self.build_and_install(entry, &base, &mut task, recipe, &mut progress).await {
						Ok(()) => {
							outcomes[i] = Some(TaskOutcome::Installed);
							if self.clean_after_build && last_use.get(base.as_str()) == Some(&i) {
								self.clean(&base).await;
							}
						},
						Err(e) => {
							let e = task.fail(e);
							log::error!("{} failed: {}", entry.name, e);
							failed = true;
							progress.broken.insert(entry.name.clone());
							if matches!(e, TaskError::Fetch(_) | TaskError::Build(_)) {
								progress.failed_bases.insert(base.clone(), entry.name.clone());
								self.clean(&base).await;
							}
							outcomes[i] = Some(TaskOutcome::Failed(e));
						},
					}
					i += 1;
				},
			}

			if failed && !self.continue_on_failure {
				log::warn!("Stopping after failure, {} entries left", entries.len() - i);
				break;
			}
		}

		BuildReport {
			entries: entries.iter().zip(outcomes)
				.map(|(e, o)| ReportEntry {
					name: e.name.clone(),
					action: e.action,
					outcome: o.unwrap_or(TaskOutcome::NotAttempted),
				})
				.collect(),
			cancelled,
		}
	}

	async fn build_and_install(&self, entry: &PlanEntry, base: &str, task: &mut BuildTask, recipe: Recipe, progress: &mut Progress) -> Result<(), TaskError> {
		task.advance(TaskStatus::Fetching)?;
		let artifacts = match recipe {
			Recipe::Built(artifacts) => {
				task.advance(TaskStatus::Building)?;
				artifacts
			},
			Recipe::Fetched(dir) => {
				let dir = dir?;
				task.advance(TaskStatus::Building)?;
				let artifacts = self.build_tool.build(&dir).await?;
				progress.built.insert(base.to_string(), artifacts.clone());
				artifacts
			},
		};
		task.advance(TaskStatus::Built)?;

		let selected = build_tool::select_artifacts(&entry.name, &artifacts)?;
		self.package_manager.install_binary(&selected, entry.reason).await?;
		task.advance(TaskStatus::Installed)
	}

	async fn clean(&self, base: &str) {
		if let Err(e) = self.fetcher.clean(base).await {
			log::warn!("Couldn't clean up {}: {}", base, e);
		}
	}
}
