//! Turning a fetched recipe into installable package files.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

use crate::native::FailureReason;
use crate::process;

#[derive(Debug, Error)]
pub enum BuildError {
	#[error("{program} failed: {reason}")]
	Failed { program: String, reason: FailureReason, diagnostic: String },
	#[error("building {} produced no package files", .0.display())]
	NoArtifacts(PathBuf),
	#[error("no package file for {name} among {count} built")]
	MissingArtifact { name: String, count: usize },
}

impl BuildError {
	/// Captured output of the build. Interactive builds only keep stderr.
	pub fn diagnostic(&self) -> &str {
		match self {
			BuildError::Failed { diagnostic, .. } => diagnostic,
			_ => "",
		}
	}
}

#[async_trait]
pub trait BuildTool: Send + Sync {
	/// Builds the recipe in `recipe_dir`, returning every package file it produced.
	async fn build(&self, recipe_dir: &Path) -> Result<Vec<PathBuf>, BuildError>;
}

/// Builds with `makepkg`, installing missing dependencies through the native package manager.
pub struct Makepkg {
	program: PathBuf,
	non_interactive: bool,
	timeout: Duration,
}

impl Makepkg {
	pub fn new(config: &crate::Config) -> Self {
		Self {
			program: PathBuf::from("makepkg"),
			non_interactive: config.non_interactive(),
			timeout: config.build_timeout(),
		}
	}

	/// Runs `program` in place of `makepkg`.
	pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
		self.program = program.into();
		self
	}

	fn command(&self, recipe_dir: &Path) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.current_dir(recipe_dir);
		cmd
	}

	async fn package_list(&self, recipe_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
		let mut cmd = self.command(recipe_dir);
		cmd.arg("--packagelist");
		let result = process::run(cmd, Duration::from_secs(60), false).await;
		if let Some(reason) = FailureReason::from_process(&result) {
			return Err(BuildError::Failed {
				program: "makepkg --packagelist".to_string(),
				reason,
				diagnostic: result.map(|o| o.tail).unwrap_or_default(),
			});
		}
		let listed = result.map(|o| o.tail).unwrap_or_default();
		Ok(listed.lines()
			.map(str::trim)
			.filter(|l| artifact_name(Path::new(l)).is_some())
			.map(PathBuf::from)
			.filter(|p| p.is_file())
			.collect())
	}
}

#[async_trait]
impl BuildTool for Makepkg {
	async fn build(&self, recipe_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
		let mut cmd = self.command(recipe_dir);
		cmd.args(["--force", "--syncdeps"]);
		if self.non_interactive {
			cmd.arg("--noconfirm");
		}

		log::info!("Building {}", recipe_dir.display());
		let result = process::run(cmd, self.timeout, !self.non_interactive).await;
		if let Some(reason) = FailureReason::from_process(&result) {
			let diagnostic = result.map(|o| o.tail).unwrap_or_default();
			log::error!("Build in {} failed: {}", recipe_dir.display(), reason);
			return Err(BuildError::Failed { program: "makepkg".to_string(), reason, diagnostic });
		}

		let artifacts = self.package_list(recipe_dir).await?;
		if artifacts.is_empty() {
			return Err(BuildError::NoArtifacts(recipe_dir.to_path_buf()));
		}
		log::debug!("Built {:?}", artifacts);
		Ok(artifacts)
	}
}

fn artifact_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| {
		Regex::new(r"^(?P<name>.+)-(?P<pkgver>[^-]+)-(?P<pkgrel>[^-]+)-(?P<arch>[^-]+)\.pkg\.tar(\.[a-z0-9]+)?$")
			.expect("artifact regex failed to compile.")
	})
}

/// The package name of a package file such as `foo-bin-1.2-1-x86_64.pkg.tar.zst`.
pub fn artifact_name(path: &Path) -> Option<String> {
	let file_name = path.file_name()?.to_str()?;
	artifact_regex().captures(file_name).map(|c| c["name"].to_string())
}

/// Picks the package file of `name` out of everything a split recipe produced.
pub fn select_artifacts(name: &str, artifacts: &[PathBuf]) -> Result<Vec<PathBuf>, BuildError> {
	let selected = artifacts.iter()
		.filter(|a| artifact_name(a).as_deref() == Some(name))
		.cloned()
		.collect::<Vec<_>>();
	if selected.is_empty() {
		return Err(BuildError::MissingArtifact { name: name.to_string(), count: artifacts.len() });
	}
	Ok(selected)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test] fn artifact_name_of_package_file() { assert_eq!(artifact_name(Path::new("/tmp/foo-bin-1.2.3-1-x86_64.pkg.tar.zst")).as_deref(), Some("foo-bin")) }
	#[test] fn artifact_name_with_epoch() { assert_eq!(artifact_name(Path::new("python-foo-2:1.0-3-any.pkg.tar.xz")).as_deref(), Some("python-foo")) }
	#[test] fn signature_is_not_an_artifact() { assert_eq!(artifact_name(Path::new("foo-1.0-1-any.pkg.tar.zst.sig")), None) }

	#[tokio::test]
	async fn interactive_build_failure_has_diagnostic() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = crate::Config::default();
		config.set_non_interactive(false);
		/* ls rejects the makepkg flags on stderr */
		let makepkg = Makepkg::new(&config).with_program("ls");
		match makepkg.build(dir.path()).await {
			Err(e @ BuildError::Failed { .. }) => assert!(!e.diagnostic().is_empty()),
			r => panic!("unexpected result {:?}", r),
		}
	}

	#[test]
	fn split_package_is_selected_by_name() {
		let artifacts = vec![
			PathBuf::from("/b/foo-1.0-1-x86_64.pkg.tar.zst"),
			PathBuf::from("/b/foo-docs-1.0-1-x86_64.pkg.tar.zst"),
		];
		assert_eq!(select_artifacts("foo-docs", &artifacts).unwrap(), vec![PathBuf::from("/b/foo-docs-1.0-1-x86_64.pkg.tar.zst")]);
		assert!(matches!(select_artifacts("bar", &artifacts), Err(BuildError::MissingArtifact { count: 2, .. })));
	}
}
