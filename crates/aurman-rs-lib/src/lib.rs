pub mod error;
pub use error::Result;
pub use error::Error;

pub mod config;
pub use config::Config;

pub mod metadb;
pub use metadb::MetaDB;
pub use metadb::package::{PackageRecord, PackageRef, PackageVersion};

pub mod native;
pub use native::{NativePackageManager, Pacman};

pub mod process;

pub mod relationship_resolver;
pub use relationship_resolver::{BuildPlan, Resolver};

pub mod installer;
pub use installer::Orchestrator;
