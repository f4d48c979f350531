use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;

use aurman_rs::installer::*;
use aurman_rs::metadb::package::*;
use aurman_rs::native::InstallReason;
use aurman_rs::relationship_resolver::*;
use aurman_rs::{Config, MetaDB, Resolver};
use aurman_rs_test_utils::*;
use tokio_util::sync::CancellationToken;

async fn plan_for(config: &Config, native: Vec<PackageRecord>, source: Vec<PackageRecord>, pm: &MockPackageManager, requests: &[&str]) -> BuildPlan {
	let db = MetaDB::new(config, Box::new(Arc::new(MockProvider::new(native))), Box::new(Arc::new(MockProvider::new(source))));
	let requests = requests.iter().map(|r| PackageRef::parse(r).unwrap()).collect::<Vec<_>>();
	Resolver::new(config, &db, pm).resolve(&requests).await.unwrap()
}

/// c <- b <- a, all built from source.
fn chain() -> Vec<PackageRecord> {
	vec![
		source_record("a", "1.0-1", &["b"]),
		source_record("b", "1.0-1", &["c"]),
		source_record("c", "1.0-1", &[]),
	]
}

/// Cancels the run while the first build is underway.
struct CancellingBuildTool {
	inner: MockBuildTool,
	token: CancellationToken,
}

#[async_trait]
impl BuildTool for CancellingBuildTool {
	async fn build(&self, recipe_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
		self.token.cancel();
		self.inner.build(recipe_dir).await
	}
}

fn artifact(name: &str) -> String {
	format!("{}-1.0-1-x86_64.pkg.tar.zst", name)
}

#[tokio::test]
async fn chain_is_built_in_order() {
	init_logging();
	let config = test_config();
	let dir = std::env::temp_dir();
	let pm = MockPackageManager::new([]);
	let plan = plan_for(&config, vec![], chain(), &pm, &["a"]).await;

	let fetcher = MockFetcher::new(&dir);
	let build_tool = MockBuildTool::new();
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(report.is_success());
	assert_eq!(build_tool.builds(), vec!["c", "b", "a"]);
	assert_eq!(pm.transactions(), vec![
		Transaction::Binary(vec![artifact("c")], InstallReason::Dependency),
		Transaction::Binary(vec![artifact("b")], InstallReason::Dependency),
		Transaction::Binary(vec![artifact("a")], InstallReason::Explicit),
	]);
	/* Cleaned once installed */
	assert_eq!(fetcher.cleans(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn failure_stops_the_run() {
	let config = test_config();
	let pm = MockPackageManager::new([]);
	let plan = plan_for(&config, vec![], chain(), &pm, &["a"]).await;

	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = MockBuildTool::new().failing_on("b");
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(matches!(report.get("c"), Some(TaskOutcome::Installed)));
	match report.get("b") {
		Some(TaskOutcome::Failed(e)) => assert!(e.diagnostic().contains("A failure occurred in build()")),
		o => panic!("unexpected outcome {:?}", o),
	}
	assert!(matches!(report.get("a"), Some(TaskOutcome::NotAttempted)));
	assert!(!report.is_success());
	assert_eq!(build_tool.builds(), vec!["c", "b"]);
	/* The failed build is cleaned up too */
	assert!(fetcher.cleans().contains(&"b".to_string()));
}

#[tokio::test]
async fn dependents_of_a_failure_are_skipped() {
	let mut config = test_config();
	config.set_continue_on_failure(true);
	let pm = MockPackageManager::new([]);
	let mut records = chain();
	records.push(source_record("other", "1.0-1", &[]));
	let plan = plan_for(&config, vec![], records, &pm, &["a", "other"]).await;

	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = MockBuildTool::new().failing_on("b");
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(matches!(report.get("c"), Some(TaskOutcome::Installed)));
	assert!(matches!(report.get("b"), Some(TaskOutcome::Failed(TaskError::Build(_)))));
	assert!(matches!(report.get("a"), Some(TaskOutcome::Skipped { failed_dependency }) if failed_dependency == "b"));
	/* Unaffected by the failure */
	assert!(matches!(report.get("other"), Some(TaskOutcome::Installed)));
	assert_eq!(report.failed().count(), 1);
	assert_eq!(report.skipped().count(), 1);
}

#[tokio::test]
async fn up_to_date_plan_does_nothing() {
	let config = test_config();
	let pm = MockPackageManager::new([installed("a", "1.0-1")]);
	let plan = plan_for(&config, vec![], vec![source_record("a", "1.0-1", &[])], &pm, &["a"]).await;
	assert!(plan.is_noop());

	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = MockBuildTool::new();
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(report.is_success());
	assert!(matches!(report.get("a"), Some(TaskOutcome::UpToDate)));
	assert!(fetcher.fetches().is_empty());
	assert!(build_tool.builds().is_empty());
	assert!(pm.transactions().is_empty());
}

#[tokio::test]
async fn repository_packages_are_installed_together() {
	let config = test_config();
	let pm = MockPackageManager::new([]);
	let plan = plan_for(
		&config,
		vec![native_record("zlib", "1.3-1"), native_record("curl", "8.0-1")],
		vec![source_record("a", "1.0-1", &["zlib", "curl"])],
		&pm,
		&["a"],
	).await;

	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = MockBuildTool::new();
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(report.is_success());
	assert_eq!(pm.transactions(), vec![
		Transaction::Repo(vec!["zlib".to_string(), "curl".to_string()], InstallReason::Dependency),
		Transaction::Binary(vec![artifact("a")], InstallReason::Explicit),
	]);
}

#[tokio::test]
async fn split_packages_share_one_build() {
	let config = test_config();
	let pm = MockPackageManager::new([]);
	let plan = plan_for(
		&config,
		vec![],
		vec![source_record("foo", "1.0-1", &[]), with_base(source_record("foo-docs", "1.0-1", &[]), "foo")],
		&pm,
		&["foo", "foo-docs"],
	).await;

	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = MockBuildTool::new().with_split("foo", &["foo", "foo-docs"]);
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(report.is_success());
	assert_eq!(fetcher.fetches(), vec!["foo"]);
	assert_eq!(build_tool.builds(), vec!["foo"]);
	assert_eq!(pm.transactions(), vec![
		Transaction::Binary(vec![artifact("foo")], InstallReason::Explicit),
		Transaction::Binary(vec![artifact("foo-docs")], InstallReason::Explicit),
	]);
	/* Only cleaned after the last package using it */
	assert_eq!(fetcher.cleans(), vec!["foo"]);
}

#[tokio::test]
async fn prefetching_is_bounded() {
	let mut config = test_config();
	config.set_parallel_fetch_limit(2);
	let pm = MockPackageManager::new([]);
	let names = ["p1", "p2", "p3", "p4", "p5"];
	let plan = plan_for(&config, vec![], names.iter().map(|n| source_record(n, "1.0-1", &[])).collect(), &pm, &names).await;

	let fetcher = MockFetcher::new(&std::env::temp_dir()).with_delay(Duration::from_millis(20));
	let build_tool = MockBuildTool::new();
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(report.is_success());
	assert_eq!(fetcher.fetches().len(), names.len());
	assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
	assert_eq!(build_tool.builds(), names);
}

#[tokio::test]
async fn failed_fetch_fails_the_entry() {
	let config = test_config();
	let pm = MockPackageManager::new([]);
	let plan = plan_for(&config, vec![], vec![source_record("gone", "1.0-1", &[])], &pm, &["gone"]).await;

	let fetcher = MockFetcher::new(&std::env::temp_dir()).failing_on("gone");
	let build_tool = MockBuildTool::new();
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(matches!(report.get("gone"), Some(TaskOutcome::Failed(TaskError::Fetch(FetchError::MissingRecipe(_))))));
	assert!(build_tool.builds().is_empty());
}

#[tokio::test]
async fn install_failure_is_reported() {
	let config = test_config();
	let pm = MockPackageManager::new([]).failing_on("a");
	let plan = plan_for(&config, vec![], vec![source_record("a", "1.0-1", &[])], &pm, &["a"]).await;

	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = MockBuildTool::new();
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	match report.get("a") {
		Some(TaskOutcome::Failed(e @ TaskError::Install(_))) => assert!(e.diagnostic().contains("failed to commit transaction")),
		o => panic!("unexpected outcome {:?}", o),
	}
}

#[tokio::test]
async fn cancelled_run_attempts_nothing() {
	let config = test_config();
	let pm = MockPackageManager::new([]);
	let plan = plan_for(&config, vec![], chain(), &pm, &["a"]).await;

	let token = CancellationToken::new();
	token.cancel();
	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = MockBuildTool::new();
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm)
		.with_cancellation(token)
		.run(&plan)
		.await;

	assert!(report.cancelled);
	assert_eq!(report.never_attempted().count(), 3);
	assert!(build_tool.builds().is_empty());
	assert!(pm.transactions().is_empty());
}

#[tokio::test]
async fn cancelled_run_finishes_current_step() {
	let config = test_config();
	let pm = MockPackageManager::new([]);
	let plan = plan_for(&config, vec![], chain(), &pm, &["a"]).await;

	let token = CancellationToken::new();
	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = CancellingBuildTool { inner: MockBuildTool::new(), token: token.clone() };
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm)
		.with_cancellation(token)
		.run(&plan)
		.await;

	assert!(report.cancelled);
	assert!(matches!(report.get("c"), Some(TaskOutcome::Installed)));
	assert!(matches!(report.get("b"), Some(TaskOutcome::NotAttempted)));
	assert!(matches!(report.get("a"), Some(TaskOutcome::NotAttempted)));
	assert_eq!(build_tool.inner.builds(), vec!["c"]);
	assert_eq!(pm.transactions(), vec![Transaction::Binary(vec![artifact("c")], InstallReason::Dependency)]);
}

#[tokio::test]
async fn built_recipe_is_cleaned_when_last_user_is_skipped() {
	let mut config = test_config();
	config.set_continue_on_failure(true);
	let pm = MockPackageManager::new([]);
	let plan = plan_for(
		&config,
		vec![],
		vec![
			source_record("foo", "1.0-1", &[]),
			with_base(source_record("foo-docs", "1.0-1", &["bar"]), "foo"),
			source_record("bar", "1.0-1", &[]),
		],
		&pm,
		&["foo", "foo-docs"],
	).await;
	assert_eq!(plan.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["foo", "bar", "foo-docs"]);

	let fetcher = MockFetcher::new(&std::env::temp_dir());
	let build_tool = MockBuildTool::new().with_split("foo", &["foo", "foo-docs"]).failing_on("bar");
	let report = Orchestrator::new(&config, &fetcher, &build_tool, &pm).run(&plan).await;

	assert!(matches!(report.get("foo"), Some(TaskOutcome::Installed)));
	assert!(matches!(report.get("foo-docs"), Some(TaskOutcome::Skipped { failed_dependency }) if failed_dependency == "bar"));
	assert_eq!(fetcher.cleans(), vec!["bar", "foo"]);
}
