use thiserror::Error;

use super::build_tool::BuildError;
use super::retrieval::FetchError;
use crate::native::InstallFailure;
use crate::relationship_resolver::Action;

/// Step a [`BuildTask`] is at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
	Pending,
	Fetching,
	Building,
	Built,
	Installed,
	Failed,
}

impl TaskStatus {
	pub fn is_terminal(self) -> bool {
		matches!(self, TaskStatus::Installed | TaskStatus::Failed)
	}

	/// `Pending -> Fetching -> Building -> Built -> Installed`, binaries go `Pending -> Installed`.
	/// Any unfinished task can fail.
	pub fn can_advance_to(self, next: TaskStatus) -> bool {
		use TaskStatus::*;
		match (self, next) {
			(s, Failed) => !s.is_terminal(),
			(Pending, Fetching) | (Fetching, Building) | (Building, Built) | (Built, Installed) => true,
			(Pending, Installed) => true,
			_ => false,
		}
	}
}

#[derive(Debug, Error)]
pub enum TaskError {
	#[error("fetching the recipe failed: {0}")]
	Fetch(#[from] FetchError),
	#[error("build failed: {0}")]
	Build(#[from] BuildError),
	#[error("install failed: {0}")]
	Install(#[from] InstallFailure),
	#[error("{name} can't move from {from:?} to {to:?}")]
	InvalidTransition { name: String, from: TaskStatus, to: TaskStatus },
}

impl TaskError {
	/// Captured output explaining the failure.
	pub fn diagnostic(&self) -> &str {
		match self {
			TaskError::Fetch(e) => e.diagnostic(),
			TaskError::Build(e) => e.diagnostic(),
			TaskError::Install(e) => &e.output,
			TaskError::InvalidTransition { .. } => "",
		}
	}
}

/// Tracks one plan entry through the orchestrator.
#[derive(Debug)]
pub struct BuildTask {
	name: String,
	action: Action,
	status: TaskStatus,
}

impl BuildTask {
	pub fn new(name: impl Into<String>, action: Action) -> Self {
		Self { name: name.into(), action, status: TaskStatus::Pending }
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn action(&self) -> Action {
		self.action
	}

	pub fn status(&self) -> TaskStatus {
		self.status
	}

	pub fn advance(&mut self, next: TaskStatus) -> Result<(), TaskError> {
		if !self.status.can_advance_to(next) {
			return Err(TaskError::InvalidTransition { name: self.name.clone(), from: self.status, to: next });
		}
		log::trace!("{}: {:?} -> {:?}", self.name, self.status, next);
		self.status = next;
		Ok(())
	}

	/// Moves the task to [`TaskStatus::Failed`] and hands back the error.
	pub fn fail(&mut self, error: TaskError) -> TaskError {
		if !self.status.is_terminal() {
			log::trace!("{}: {:?} -> Failed", self.name, self.status);
			self.status = TaskStatus::Failed;
		}
		error
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn build_walks_every_step() {
		let mut task = BuildTask::new("foo", Action::BuildFromSource);
		for s in [TaskStatus::Fetching, TaskStatus::Building, TaskStatus::Built, TaskStatus::Installed] {
			task.advance(s).unwrap();
		}
		assert_eq!(task.status(), TaskStatus::Installed);
	}

	#[test] fn steps_cant_be_skipped() { assert!(BuildTask::new("foo", Action::BuildFromSource).advance(TaskStatus::Built).is_err()) }
	#[test] fn finished_task_cant_fail() { assert!(!TaskStatus::Installed.can_advance_to(TaskStatus::Failed)) }
	#[test] fn failed_task_stays_failed() { assert!(!TaskStatus::Failed.can_advance_to(TaskStatus::Fetching)) }

	#[test]
	fn failing_keeps_the_cause() {
		let mut task = BuildTask::new("foo", Action::BuildFromSource);
		task.advance(TaskStatus::Fetching).unwrap();
		let err = task.fail(TaskError::Fetch(FetchError::MissingRecipe("/tmp/foo".into())));
		assert_eq!(task.status(), TaskStatus::Failed);
		assert!(matches!(err, TaskError::Fetch(FetchError::MissingRecipe(_))));
	}
}
