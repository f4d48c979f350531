//! Settings shared by the resolver, orchestrator and front-ends.
//!
//! A [`Config`] is loaded once at start up and passed by reference to everything that needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Serialize, Deserialize};

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
	if let Ok(e) = std::env::var(var) {
		PathBuf::from(e)
	} else if let Ok(home) = std::env::var("HOME") {
		PathBuf::from(home).join(fallback)
	} else {
		/* No home directory, most likely running under a service manager */
		std::env::temp_dir()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Where recipes are cloned and built.
	build_dir: PathBuf,
	/// Root of the native package database, usually `/var/lib/pacman`.
	pacman_db_path: PathBuf,
	aur_url: String,
	https_only: bool,
	/// Program used to elevate native transactions, `sudo` or `doas`.
	su_program: String,

	prefer_installed_provider: bool,
	continue_on_failure: bool,
	non_interactive: bool,
	clean_after_build: bool,

	lookup_timeout_secs: u64,
	lookup_retries: u32,
	parallel_fetch_limit: usize,
	fetch_timeout_secs: u64,
	build_timeout_secs: u64,
	install_timeout_secs: u64,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			build_dir: xdg_dir("XDG_CACHE_HOME", ".cache").join("aurman-rs").join("build"),
			pacman_db_path: PathBuf::from("/var/lib/pacman"),
			aur_url: "https://aur.archlinux.org".to_string(),
			https_only: true,
			su_program: "sudo".to_string(),
			prefer_installed_provider: true,
			continue_on_failure: false,
			non_interactive: false,
			clean_after_build: true,
			lookup_timeout_secs: 15,
			lookup_retries: 3,
			parallel_fetch_limit: 4,
			fetch_timeout_secs: 300,
			build_timeout_secs: 4 * 60 * 60,
			install_timeout_secs: 30 * 60,
		}
	}
}

impl Config {
	pub fn config_file_path() -> PathBuf {
		xdg_dir("XDG_CONFIG_HOME", ".config").join("aurman-rs").join("config.json")
	}

	/// Loads the config from the default location.
	///
	/// # Errors
	/// - [`IO`](crate::Error::IO) when the file can't be read.
	/// - [`SerdeJSON`](crate::Error::SerdeJSON) when the file is not a valid config.
	pub fn load_from_disk() -> crate::Result<Self> {
		Self::load_from_file(Self::config_file_path())
	}

	pub fn load_from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
		let file = std::fs::File::open(path)?;
		let config: Config = serde_json::from_reader(file)?;
		config.validate()?;
		Ok(config)
	}

	pub fn save_to_disk(&self) -> crate::Result<()> {
		let path = Self::config_file_path();
		std::fs::create_dir_all(path.with_file_name(""))?;
		let file = std::fs::File::create(path)?;
		serde_json::to_writer_pretty(file, self)?;
		Ok(())
	}

	fn validate(&self) -> crate::Result<()> {
		if self.parallel_fetch_limit == 0 {
			return Err(crate::Error::Validation("parallel_fetch_limit must be at least 1".to_string()));
		}
		if self.lookup_timeout_secs == 0 {
			return Err(crate::Error::Validation("lookup_timeout_secs must be at least 1".to_string()));
		}
		Ok(())
	}

	/* Paths */

	pub fn build_dir(&self) -> &Path {
		&self.build_dir
	}
	pub fn set_build_dir(&mut self, build_dir: PathBuf) {
		self.build_dir = build_dir;
	}

	pub fn pacman_db_path(&self) -> &Path {
		&self.pacman_db_path
	}
	pub fn set_pacman_db_path(&mut self, path: PathBuf) {
		self.pacman_db_path = path;
	}

	/* Remote */

	pub fn aur_url(&self) -> &str {
		&self.aur_url
	}
	pub fn set_aur_url(&mut self, url: impl Into<String>) {
		self.aur_url = url.into();
	}

	pub fn https_only(&self) -> bool {
		self.https_only
	}
	pub fn set_https_only(&mut self, https_only: bool) {
		self.https_only = https_only;
	}

	pub fn su_program(&self) -> &str {
		&self.su_program
	}
	pub fn set_su_program(&mut self, program: impl Into<String>) {
		self.su_program = program.into();
	}

	/* Resolution preferences */

	pub fn prefer_installed_provider(&self) -> bool {
		self.prefer_installed_provider
	}
	pub fn set_prefer_installed_provider(&mut self, value: bool) {
		self.prefer_installed_provider = value;
	}

	pub fn continue_on_failure(&self) -> bool {
		self.continue_on_failure
	}
	pub fn set_continue_on_failure(&mut self, value: bool) {
		self.continue_on_failure = value;
	}

	pub fn non_interactive(&self) -> bool {
		self.non_interactive
	}
	pub fn set_non_interactive(&mut self, value: bool) {
		self.non_interactive = value;
	}

	pub fn clean_after_build(&self) -> bool {
		self.clean_after_build
	}
	pub fn set_clean_after_build(&mut self, value: bool) {
		self.clean_after_build = value;
	}

	/* Limits */

	pub fn lookup_timeout(&self) -> Duration {
		Duration::from_secs(self.lookup_timeout_secs)
	}
	pub fn set_lookup_timeout(&mut self, timeout: Duration) {
		self.lookup_timeout_secs = timeout.as_secs().max(1);
	}

	pub fn lookup_retries(&self) -> u32 {
		self.lookup_retries
	}
	pub fn set_lookup_retries(&mut self, retries: u32) {
		self.lookup_retries = retries;
	}

	pub fn parallel_fetch_limit(&self) -> usize {
		self.parallel_fetch_limit
	}
	/// Values below 1 are clamped to 1.
	pub fn set_parallel_fetch_limit(&mut self, limit: usize) {
		self.parallel_fetch_limit = limit.max(1);
	}

	pub fn fetch_timeout(&self) -> Duration {
		Duration::from_secs(self.fetch_timeout_secs)
	}
	pub fn set_fetch_timeout(&mut self, timeout: Duration) {
		self.fetch_timeout_secs = timeout.as_secs();
	}

	pub fn build_timeout(&self) -> Duration {
		Duration::from_secs(self.build_timeout_secs)
	}
	pub fn set_build_timeout(&mut self, timeout: Duration) {
		self.build_timeout_secs = timeout.as_secs();
	}

	pub fn install_timeout(&self) -> Duration {
		Duration::from_secs(self.install_timeout_secs)
	}
	pub fn set_install_timeout(&mut self, timeout: Duration) {
		self.install_timeout_secs = timeout.as_secs();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn partial_config_file_uses_defaults() {
		let config: Config = serde_json::from_str(r#"{ "continue_on_failure": true, "su_program": "doas" }"#).unwrap();
		assert!(config.continue_on_failure());
		assert_eq!(config.su_program(), "doas");
		assert_eq!(config.parallel_fetch_limit(), 4);
		assert!(config.prefer_installed_provider());
	}

	#[test]
	fn unknown_fields_are_ignored() {
		let config: Config = serde_json::from_str(r#"{ "data_dir": "/tmp/aurman", "non_interactive": true }"#).unwrap();
		assert!(config.non_interactive());
	}

	#[test]
	fn zero_fetch_limit_is_rejected() {
		let config: Config = serde_json::from_str(r#"{ "parallel_fetch_limit": 0 }"#).unwrap();
		assert!(config.validate().is_err());
	}

	#[test] fn fetch_limit_setter_clamps() { let mut c = Config::default(); c.set_parallel_fetch_limit(0); assert_eq!(c.parallel_fetch_limit(), 1) }
}
