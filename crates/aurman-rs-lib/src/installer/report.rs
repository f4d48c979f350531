use super::task::TaskError;
use crate::relationship_resolver::Action;

/// What happened to a plan entry.
#[derive(Debug)]
pub enum TaskOutcome {
	/// Nothing needed doing.
	UpToDate,
	Installed,
	Failed(TaskError),
	/// Left out because something it needs failed, names the failed package.
	Skipped { failed_dependency: String },
	/// The run stopped before reaching it.
	NotAttempted,
}

impl TaskOutcome {
	pub fn is_failure(&self) -> bool {
		matches!(self, TaskOutcome::Failed(_))
	}
}

impl std::fmt::Display for TaskOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TaskOutcome::UpToDate => write!(f, "up to date"),
			TaskOutcome::Installed => write!(f, "installed"),
			TaskOutcome::Failed(e) => write!(f, "failed: {}", e),
			TaskOutcome::Skipped { failed_dependency } => write!(f, "skipped, {} failed", failed_dependency),
			TaskOutcome::NotAttempted => write!(f, "not attempted"),
		}
	}
}

#[derive(Debug)]
pub struct ReportEntry {
	pub name: String,
	pub action: Action,
	pub outcome: TaskOutcome,
}

/// Outcome of every entry of a plan, in plan order.
#[derive(Debug, Default)]
pub struct BuildReport {
	pub entries: Vec<ReportEntry>,
	/// The run was cancelled before it finished.
	pub cancelled: bool,
}

impl BuildReport {
	pub fn get(&self, name: &str) -> Option<&TaskOutcome> {
		self.entries.iter().find(|e| e.name == name).map(|e| &e.outcome)
	}

	pub fn completed(&self) -> impl Iterator<Item = &ReportEntry> {
		self.entries.iter().filter(|e| matches!(e.outcome, TaskOutcome::UpToDate | TaskOutcome::Installed))
	}

	pub fn failed(&self) -> impl Iterator<Item = &ReportEntry> {
		self.entries.iter().filter(|e| e.outcome.is_failure())
	}

	pub fn skipped(&self) -> impl Iterator<Item = &ReportEntry> {
		self.entries.iter().filter(|e| matches!(e.outcome, TaskOutcome::Skipped { .. }))
	}

	pub fn never_attempted(&self) -> impl Iterator<Item = &ReportEntry> {
		self.entries.iter().filter(|e| matches!(e.outcome, TaskOutcome::NotAttempted))
	}

	/// True when every entry is up to date or installed.
	pub fn is_success(&self) -> bool {
		!self.cancelled && self.completed().count() == self.entries.len()
	}
}

impl std::fmt::Display for BuildReport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		for e in &self.entries {
			writeln!(f, "{:<8} {} {}", e.action.to_string(), e.name, e.outcome)?;
		}
		write!(f, "{} completed, {} failed, {} skipped, {} not attempted",
			self.completed().count(),
			self.failed().count(),
			self.skipped().count(),
			self.never_attempted().count(),
		)?;
		if self.cancelled {
			write!(f, " (cancelled)")?;
		}
		Ok(())
	}
}
