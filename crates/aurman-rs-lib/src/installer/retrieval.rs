//! Retrieval is when we get a package's recipe onto disk, ready to be built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::native::FailureReason;
use crate::process;

/// Name of the recipe file a fetched repository must hold.
pub const RECIPE_FILE: &str = "PKGBUILD";

#[derive(Debug, Error)]
pub enum FetchError {
	/// The repository was fetched but holds no recipe, usually because the base doesn't exist.
	#[error("no PKGBUILD in {}", .0.display())]
	MissingRecipe(PathBuf),
	/// The base would not name a single directory inside the build directory.
	#[error("invalid recipe base {0:?}")]
	InvalidBase(String),
	#[error("git {operation} for {base} failed: {reason}")]
	Git { base: String, operation: String, reason: FailureReason, output: String },
	#[error(transparent)]
	IO(#[from] std::io::Error),
}

impl FetchError {
	/// Captured output of the failing step, empty when there is none.
	pub fn diagnostic(&self) -> &str {
		match self {
			FetchError::Git { output, .. } => output,
			_ => "",
		}
	}
}

/// Gets recipes onto disk.
#[async_trait]
pub trait RecipeFetcher: Send + Sync {
	/// Makes the recipe directory for `base` match the remote, cloning it when missing.
	///
	/// Calling this again for the same base must be harmless.
	async fn fetch_or_update(&self, base: &str) -> Result<PathBuf, FetchError>;

	/// Removes the recipe directory for `base` along with any build leftovers.
	async fn clean(&self, base: &str) -> Result<(), FetchError>;
}

/// Clones recipes from `<aur_url>/<base>.git` into the build directory.
pub struct GitFetcher {
	build_dir: PathBuf,
	aur_url: String,
	timeout: Duration,
}

impl GitFetcher {
	pub fn new(config: &crate::Config) -> Self {
		Self {
			build_dir: config.build_dir().to_path_buf(),
			aur_url: config.aur_url().trim_end_matches('/').to_string(),
			timeout: config.fetch_timeout(),
		}
	}

	pub fn recipe_dir(&self, base: &str) -> Result<PathBuf, FetchError> {
		if base.is_empty() || base.starts_with('.') || base.contains(['/', '\\']) {
			return Err(FetchError::InvalidBase(base.to_string()));
		}
		Ok(self.build_dir.join(base))
	}

	fn remote_url(&self, base: &str) -> String {
		format!("{}/{}.git", self.aur_url, base)
	}

	async fn git(&self, base: &str, cwd: &Path, args: &[&str]) -> Result<(), FetchError> {
		let mut cmd = Command::new("git");
		cmd.args(args).current_dir(cwd).env("GIT_TERMINAL_PROMPT", "0");

		let result = process::run(cmd, self.timeout, false).await;
		match FailureReason::from_process(&result) {
			None => Ok(()),
			Some(reason) => Err(FetchError::Git {
				base: base.to_string(),
				operation: args.first().copied().unwrap_or_default().to_string(),
				reason,
				output: result.map(|o| o.tail).unwrap_or_default(),
			}),
		}
	}
}

#[async_trait]
impl RecipeFetcher for GitFetcher {
	async fn fetch_or_update(&self, base: &str) -> Result<PathBuf, FetchError> {
		let dir = self.recipe_dir(base)?;

		if dir.join(".git").is_dir() {
			log::info!("Updating recipe for {}", base);
			self.git(base, &dir, &["fetch", "--quiet"]).await?;
			self.git(base, &dir, &["reset", "--hard", "--quiet", "@{upstream}"]).await?;
		} else {
			if dir.exists() {
				log::warn!("{} is not a git repository, replacing it", dir.display());
				tokio::fs::remove_dir_all(&dir).await?;
			}
			tokio::fs::create_dir_all(&self.build_dir).await?;

			log::info!("Cloning recipe for {}", base);
			let url = self.remote_url(base);
			let target = dir.to_string_lossy();
			self.git(base, &self.build_dir, &["clone", "--quiet", url.as_str(), &*target]).await?;
		}

		if !dir.join(RECIPE_FILE).is_file() {
			return Err(FetchError::MissingRecipe(dir));
		}
		Ok(dir)
	}

	async fn clean(&self, base: &str) -> Result<(), FetchError> {
		let dir = self.recipe_dir(base)?;
		if dir.exists() {
			log::debug!("Removing {}", dir.display());
			tokio::fs::remove_dir_all(&dir).await?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn fetcher(build_dir: &Path) -> GitFetcher {
		let mut config = crate::Config::default();
		config.set_build_dir(build_dir.to_path_buf());
		config.set_aur_url("https://aur.archlinux.org/");
		GitFetcher::new(&config)
	}

	#[test]
	fn remote_url_uses_base() {
		let dir = tempfile::tempdir().unwrap();
		assert_eq!(fetcher(dir.path()).remote_url("python-foo"), "https://aur.archlinux.org/python-foo.git");
	}

	#[tokio::test]
	async fn clean_removes_recipe_dir() {
		let dir = tempfile::tempdir().unwrap();
		let f = fetcher(dir.path());
		let recipe = f.recipe_dir("foo").unwrap();
		std::fs::create_dir_all(&recipe).unwrap();
		std::fs::write(recipe.join(RECIPE_FILE), "pkgname=foo\n").unwrap();

		f.clean("foo").await.unwrap();
		assert!(!recipe.exists());
		/* Cleaning twice is fine */
		f.clean("foo").await.unwrap();
	}

	#[tokio::test]
	async fn base_outside_build_dir_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let build_dir = dir.path().join("build");
		std::fs::create_dir(&build_dir).unwrap();
		std::fs::create_dir(dir.path().join("keep")).unwrap();
		let f = fetcher(&build_dir);

		for base in ["../keep", "..", "a/b", ""] {
			assert!(matches!(f.clean(base).await, Err(FetchError::InvalidBase(_))), "{base}");
			assert!(matches!(f.fetch_or_update(base).await, Err(FetchError::InvalidBase(_))), "{base}");
		}
		assert!(dir.path().join("keep").exists());
		assert!(build_dir.exists());
	}
}
