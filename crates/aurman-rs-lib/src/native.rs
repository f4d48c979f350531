//! The native package manager: installed state and transactions.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::metadb::desc::Desc;
use crate::metadb::package::*;
use crate::process::{self, ProcessError};

/// Why a package is installed, tracked by the native package manager so orphans can be found later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallReason {
	/// Requested by the user.
	Explicit,
	/// Pulled in to satisfy another package.
	Dependency,
}

impl InstallReason {
	fn flag(self) -> &'static str {
		match self {
			InstallReason::Explicit => "--asexplicit",
			InstallReason::Dependency => "--asdeps",
		}
	}
}

/// Machine-readable cause of a failed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
	ExitCode(i32),
	/// Killed by a signal, no exit code.
	Terminated,
	TimedOut(Duration),
	Spawn(String),
}

impl std::fmt::Display for FailureReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FailureReason::ExitCode(code) => write!(f, "exit code {}", code),
			FailureReason::Terminated => write!(f, "terminated by signal"),
			FailureReason::TimedOut(t) => write!(f, "timed out after {:?}", t),
			FailureReason::Spawn(e) => write!(f, "couldn't start: {}", e),
		}
	}
}

impl FailureReason {
	/// Converts a process result into a failure, `None` when the program succeeded.
	pub fn from_process(result: &Result<process::ProcessOutput, ProcessError>) -> Option<Self> {
		match result {
			Ok(output) if output.success() => None,
			Ok(output) => Some(match output.status.code() {
				Some(code) => FailureReason::ExitCode(code),
				None => FailureReason::Terminated,
			}),
			Err(ProcessError::TimedOut { timeout, .. }) => Some(FailureReason::TimedOut(*timeout)),
			Err(e) => Some(FailureReason::Spawn(e.to_string())),
		}
	}
}

/// A native transaction that did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed: {reason}")]
pub struct InstallFailure {
	pub operation: String,
	pub reason: FailureReason,
	/// Captured output of the transaction. Interactive transactions only keep stderr.
	pub output: String,
}

/// A package present in the local database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
	pub name: String,
	pub version: PackageVersion,
	pub provides: Vec<Provide>,
}

impl InstalledPackage {
	pub fn satisfies(&self, requirement: &PackageRef) -> bool {
		(self.name == requirement.name && requirement.constraint.is_satisfied_by(&self.version))
			|| self.provides.iter().any(|p| p.satisfies(requirement))
	}
}

/// Queries and transactions of the native package manager.
///
/// Transactions are only ever issued from one sequential stream.
#[async_trait]
pub trait NativePackageManager: Send + Sync {
	async fn installed_package(&self, name: &str) -> Option<InstalledPackage>;

	async fn installed_version(&self, name: &str) -> Option<PackageVersion> {
		self.installed_package(name).await.map(|p| p.version)
	}

	/// Installed packages declaring `provides = name`.
	async fn installed_providers(&self, name: &str) -> Vec<InstalledPackage>;

	async fn installed_packages(&self) -> Vec<InstalledPackage>;

	/// Installed packages absent from every sync repository, the candidates for source upgrades.
	async fn foreign_packages(&self) -> Vec<InstalledPackage>;

	/// Installs built package files.
	async fn install_binary(&self, artifacts: &[PathBuf], reason: InstallReason) -> Result<(), InstallFailure>;

	/// Installs packages from the native repositories by name.
	async fn install_from_repo(&self, names: &[String], reason: InstallReason) -> Result<(), InstallFailure>;

	async fn remove(&self, names: &[String]) -> Result<(), InstallFailure>;
}

/// `pacman` backed package manager.
///
/// The local database is read once when opened, queries answer from that snapshot.
pub struct Pacman {
	packages: HashMap<String, InstalledPackage>,
	provides: HashMap<String, Vec<String>>,
	sync_packages: HashSet<String>,
	su_program: String,
	non_interactive: bool,
	timeout: Duration,
}

impl Pacman {
	/// Reads the local database under `<pacman_db_path>/local`.
	pub fn open(config: &crate::Config) -> crate::Result<Self> {
		let installed = read_local_db(&config.pacman_db_path().join("local"))?;
		log::debug!("{} packages installed", installed.len());
		Ok(Self::from_installed(config, installed))
	}

	pub fn from_installed(config: &crate::Config, installed: Vec<InstalledPackage>) -> Self {
		let mut provides: HashMap<String, Vec<String>> = HashMap::new();
		for package in &installed {
			for p in &package.provides {
				provides.entry(p.name.clone()).or_default().push(package.name.clone());
			}
		}
		Self {
			packages: installed.into_iter().map(|p| (p.name.clone(), p)).collect(),
			provides,
			sync_packages: HashSet::new(),
			su_program: config.su_program().to_string(),
			non_interactive: config.non_interactive(),
			timeout: config.install_timeout(),
		}
	}

	/// Names available in the sync repositories. Until set every installed package is foreign.
	pub fn with_sync_packages<'s>(mut self, names: impl IntoIterator<Item = &'s str>) -> Self {
		self.sync_packages = names.into_iter().map(str::to_string).collect();
		self
	}

	fn command(&self, operation: &str) -> Command {
		let mut cmd = if self.su_program.is_empty() {
			Command::new("pacman")
		} else {
			let mut cmd = Command::new(&self.su_program);
			cmd.arg("pacman");
			cmd
		};
		cmd.arg(operation);
		if self.non_interactive {
			cmd.arg("--noconfirm");
		}
		cmd
	}

	async fn transaction(&self, operation: &str, command: Command) -> Result<(), InstallFailure> {
		log::info!("Running pacman {}", operation);
		let result = process::run(command, self.timeout, !self.non_interactive).await;
		match FailureReason::from_process(&result) {
			None => Ok(()),
			Some(reason) => {
				let output = result.map(|o| o.tail).unwrap_or_default();
				log::error!("pacman {} failed: {}", operation, reason);
				Err(InstallFailure { operation: format!("pacman {}", operation), reason, output })
			},
		}
	}
}

/// Reads every `desc` file of a local database directory.
///
/// Entries that can't be parsed are logged and skipped.
pub fn read_local_db(local_dir: &Path) -> crate::Result<Vec<InstalledPackage>> {
	let mut installed = Vec::new();
	for entry in std::fs::read_dir(local_dir)? {
		let path = entry?.path().join("desc");
		if !path.is_file() {
			continue;
		}
		let content = std::fs::read_to_string(&path)?;
		match Desc::parse(&content).into_record(Origin::Native { repository: "local".to_string() }) {
			Ok(r) => installed.push(InstalledPackage { name: r.name, version: r.version, provides: r.provides }),
			Err(e) => log::warn!("Couldn't read {}: {}", path.display(), e),
		}
	}
	Ok(installed)
}

#[async_trait]
impl NativePackageManager for Pacman {
	async fn installed_package(&self, name: &str) -> Option<InstalledPackage> {
		self.packages.get(name).cloned()
	}

	async fn installed_providers(&self, name: &str) -> Vec<InstalledPackage> {
		self.provides.get(name)
			.map(|names| names.iter().filter_map(|n| self.packages.get(n)).cloned().collect())
			.unwrap_or_default()
	}

	async fn installed_packages(&self) -> Vec<InstalledPackage> {
		let mut packages = self.packages.values().cloned().collect::<Vec<_>>();
		packages.sort_by(|a, b| a.name.cmp(&b.name));
		packages
	}

	async fn foreign_packages(&self) -> Vec<InstalledPackage> {
		self.installed_packages().await.into_iter()
			.filter(|p| !self.sync_packages.contains(&p.name))
			.collect()
	}

	async fn install_binary(&self, artifacts: &[PathBuf], reason: InstallReason) -> Result<(), InstallFailure> {
		let mut cmd = self.command("-U");
		cmd.arg(reason.flag()).args(artifacts);
		self.transaction("-U", cmd).await
	}

	async fn install_from_repo(&self, names: &[String], reason: InstallReason) -> Result<(), InstallFailure> {
		let mut cmd = self.command("-S");
		cmd.arg("--needed").arg(reason.flag()).args(names);
		self.transaction("-S", cmd).await
	}

	async fn remove(&self, names: &[String]) -> Result<(), InstallFailure> {
		let mut cmd = self.command("-R");
		cmd.args(names);
		self.transaction("-R", cmd).await
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn installed_package_satisfies_through_provides() {
		let bash = InstalledPackage {
			name: "bash".to_string(),
			version: PackageVersion::new("5.2-1").unwrap(),
			provides: vec![Provide::parse("sh").unwrap()],
		};
		assert!(bash.satisfies(&PackageRef::parse("sh").unwrap()));
		assert!(bash.satisfies(&PackageRef::parse("bash>=5").unwrap()));
		assert!(!bash.satisfies(&PackageRef::parse("zsh").unwrap()));
	}

	#[test]
	fn local_db_is_read() {
		let dir = tempfile::tempdir().unwrap();
		let pkg = dir.path().join("bash-5.2-1");
		std::fs::create_dir(&pkg).unwrap();
		std::fs::write(pkg.join("desc"), "%NAME%\nbash\n\n%VERSION%\n5.2-1\n\n%PROVIDES%\nsh\n\n").unwrap();
		std::fs::write(dir.path().join("ALPM_DB_VERSION"), "9\n").unwrap();

		let installed = read_local_db(dir.path()).unwrap();
		assert_eq!(installed.len(), 1);
		assert_eq!(installed[0].provides[0].name, "sh");
	}

	#[tokio::test]
	async fn providers_come_from_snapshot() {
		let config = crate::Config::default();
		let installed = vec![InstalledPackage {
			name: "bash".to_string(),
			version: PackageVersion::new("5.2-1").unwrap(),
			provides: vec![Provide::parse("sh").unwrap()],
		}];
		let pacman = Pacman::from_installed(&config, installed);
		assert_eq!(pacman.installed_providers("sh").await.len(), 1);
		assert_eq!(pacman.installed_version("sh").await, None);
	}

	#[tokio::test]
	async fn foreign_packages_are_missing_from_sync() {
		let installed = ["bash", "yay"].iter().map(|n| InstalledPackage {
			name: n.to_string(),
			version: PackageVersion::new("1-1").unwrap(),
			provides: Vec::new(),
		}).collect();
		let pacman = Pacman::from_installed(&crate::Config::default(), installed).with_sync_packages(["bash", "zsh"]);
		let foreign = pacman.foreign_packages().await;
		assert_eq!(foreign.len(), 1);
		assert_eq!(foreign[0].name, "yay");
	}

	#[tokio::test]
	async fn interactive_transaction_failure_keeps_output() {
		let mut config = crate::Config::default();
		config.set_non_interactive(false);
		/* Runs `ls pacman -R missing`, which fails on stderr */
		config.set_su_program("ls");
		let pacman = Pacman::from_installed(&config, Vec::new());
		let failure = pacman.remove(&["missing".to_string()]).await.unwrap_err();
		assert!(!failure.output.is_empty());
	}

	#[test]
	fn exit_code_becomes_failure_reason() {
		let err: Result<process::ProcessOutput, ProcessError> = Err(ProcessError::TimedOut { program: "pacman".to_string(), timeout: Duration::from_secs(1) });
		assert_eq!(FailureReason::from_process(&err), Some(FailureReason::TimedOut(Duration::from_secs(1))));
	}
}
