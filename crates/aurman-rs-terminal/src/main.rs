use std::io::Write;
use std::process::ExitCode;

use aurman_rs::installer::{GitFetcher, Makepkg};
use aurman_rs::metadb::aur::AurProvider;
use aurman_rs::metadb::iterator::SearchHitsExt;
use aurman_rs::metadb::sync_db::{self, SyncDbProvider};
use aurman_rs::metadb::OriginKind;
use aurman_rs::relationship_resolver::Action;
use aurman_rs::{BuildPlan, Config, MetaDB, NativePackageManager, Orchestrator, PackageRef, Pacman, Resolver};
use tokio_util::sync::CancellationToken;

const USAGE: &str = "Usage: aurman [options] <install|upgrade|search|info|remove> [args...]";

#[tokio::main]
async fn main() -> ExitCode {
	let mut opts;

	/* Parse console input */
	let parsed_options = {
		let args: Vec<String> = std::env::args().collect();

		opts = getopts::Options::new();
		opts.optflag( "h", "help",                "Show help");
		opts.optflag( "v", "verbose",             "Increased verbosity");
		opts.optflag( "",  "noconfirm",           "Never ask, fail instead of prompting");
		opts.optflag( "",  "continue-on-failure", "Keep building packages unaffected by a failure");
		opts.optmulti("",  "provider",            "Provider to use for a name provided by several packages", "NAME=PACKAGE");
		opts.parsing_style(getopts::ParsingStyle::FloatingFrees);

		let parsed_options = match opts.parse(&args[1..]) {
			Ok(m)  => { m }
			Err(e) => { eprintln!("Unable to parse options: {}", e); return ExitCode::FAILURE }
		};

		if parsed_options.opt_present("h") {
			eprintln!("{}", opts.usage(USAGE));
			return ExitCode::SUCCESS;
		}

		parsed_options
	};

	let default_filter = if parsed_options.opt_present("v") { "debug" } else { "info" };
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

	let mut config = Config::load_from_disk().unwrap_or_else(|e| {
		log::warn!("Failed to read config file: {}", e);
		log::warn!("Using default config.");
		Config::default()
	});
	if parsed_options.opt_present("noconfirm") {
		config.set_non_interactive(true);
	}
	if parsed_options.opt_present("continue-on-failure") {
		config.set_continue_on_failure(true);
	}

	let providers = match parsed_options.opt_strs("provider").iter().map(|p| parse_provider(p)).collect::<Result<Vec<_>, _>>() {
		Ok(p) => p,
		Err(e) => { eprintln!("{}", e); return ExitCode::FAILURE },
	};

	let Some(command) = parsed_options.free.first() else {
		eprintln!("{}", opts.usage(USAGE));
		return ExitCode::FAILURE;
	};
	let args = &parsed_options.free[1..];

	let cancellation = CancellationToken::new();
	{
		let cancellation = cancellation.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				log::warn!("Interrupted, finishing the current step.");
				cancellation.cancel();
			}
		});
	}

	let app = match App::open(config, providers, cancellation) {
		Ok(app) => app,
		Err(e) => { log::error!("{}", e); return ExitCode::FAILURE },
	};

	let result = match command.as_str() {
		"install" => app.install(args).await,
		"upgrade" => app.upgrade().await,
		"search" => app.search(args).await,
		"info" => app.info(args).await,
		"remove" => app.remove(args).await,
		other => Err(Error::UnknownCommand(other.to_string())),
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(Error::UserCancelled) => {
			println!("Nothing was changed.");
			ExitCode::FAILURE
		},
		Err(e) => {
			log::error!("{}", e);
			ExitCode::FAILURE
		},
	}
}

fn parse_provider(arg: &str) -> Result<(String, String), Error> {
	match arg.split_once('=') {
		Some((name, choice)) if !name.is_empty() && !choice.is_empty() => Ok((name.to_string(), choice.to_string())),
		_ => Err(Error::InvalidArgument(format!("--provider expects NAME=PACKAGE, got {}", arg))),
	}
}

struct App {
	config: Config,
	metadb: MetaDB,
	pacman: Pacman,
	providers: Vec<(String, String)>,
	cancellation: CancellationToken,
}

impl App {
	fn open(config: Config, providers: Vec<(String, String)>, cancellation: CancellationToken) -> Result<Self, Error> {
		let repositories = std::fs::read_to_string("/etc/pacman.conf")
			.map(|c| sync_db::repositories_from_pacman_conf(&c))
			.unwrap_or_else(|e| {
				log::warn!("Couldn't read pacman.conf, loading every sync database: {}", e);
				Vec::new()
			});
		let sync = SyncDbProvider::open(config.pacman_db_path(), &repositories)?;
		let pacman = Pacman::open(&config)?.with_sync_packages(sync.package_names());
		let aur = AurProvider::new(&config)?;
		let metadb = MetaDB::new(&config, Box::new(sync), Box::new(aur));

		Ok(Self { config, metadb, pacman, providers, cancellation })
	}

	async fn install(&self, names: &[String]) -> Result<(), Error> {
		if names.is_empty() {
			return Err(Error::MissingArgument("package names"));
		}
		let requests = names.iter()
			.map(|n| PackageRef::parse(n).map_err(|e| Error::InvalidArgument(format!("{}: {}", n, e))))
			.collect::<Result<Vec<_>, _>>()?;
		self.resolve_and_run(&requests).await
	}

	async fn upgrade(&self) -> Result<(), Error> {
		let resolver = Resolver::new(&self.config, &self.metadb, &self.pacman);
		let requests = resolver.upgrade_requests().await?;
		if requests.is_empty() {
			println!("Every foreign package is up to date.");
			return Ok(());
		}
		self.resolve_and_run(&requests).await
	}

	async fn resolve_and_run(&self, requests: &[PackageRef]) -> Result<(), Error> {
		let mut resolver = Resolver::new(&self.config, &self.metadb, &self.pacman);
		for (name, choice) in &self.providers {
			resolver.add_decision_for(name, choice);
		}

		let plan = loop {
			match resolver.resolve(requests).await {
				Ok(plan) => break plan,
				Err(e) if e.only_needs_decisions() && !self.config.non_interactive() => {
					let answers = e.ambiguous_providers()
						.map(|(name, options)| prompt_provider(name, options).map(|c| (name.to_string(), c)))
						.collect::<Result<Vec<_>, _>>()?;
					for (name, choice) in answers {
						resolver.add_decision_for(&name, &choice);
					}
				},
				Err(e) => {
					eprintln!("{}", e);
					return Err(Error::Resolver);
				},
			}
		};

		if plan.is_noop() {
			println!("Everything is up to date.");
			return Ok(());
		}
		print_plan(&plan);
		if !self.config.non_interactive() {
			confirm("Proceed?")?;
		}

		let fetcher = GitFetcher::new(&self.config);
		let build_tool = Makepkg::new(&self.config);
		let report = Orchestrator::new(&self.config, &fetcher, &build_tool, &self.pacman)
			.with_cancellation(self.cancellation.clone())
			.run(&plan)
			.await;

		println!("{}", report);
		for entry in report.failed() {
			if let aurman_rs::installer::TaskOutcome::Failed(e) = &entry.outcome {
				if !e.diagnostic().is_empty() {
					eprintln!("--- {} ---\n{}", entry.name, e.diagnostic());
				}
			}
		}

		if report.is_success() { Ok(()) } else { Err(Error::Build) }
	}

	async fn search(&self, terms: &[String]) -> Result<(), Error> {
		if terms.is_empty() {
			return Err(Error::MissingArgument("search term"));
		}
		let term = terms.join(" ");
		let (native, source): (Vec<_>, Vec<_>) = self.metadb.search(&term).await
			.map_err(aurman_rs::Error::from)?
			.partition(|h| h.repository != "aur");

		for hit in native.into_iter().chain(source.into_iter().most_popular_first()) {
			let mut line = format!("{}/{} {}", hit.repository, hit.name, hit.version);
			if let Some(p) = hit.popularity {
				line += &format!(" [popularity {:.2}]", p);
			}
			if let Some(m) = &hit.maintainer {
				line += &format!(" ({})", m);
			}
			if hit.out_of_date {
				line += " [out of date]";
			}
			println!("{}", line);
			if let Some(d) = &hit.description {
				println!("    {}", d);
			}
		}
		Ok(())
	}

	async fn info(&self, names: &[String]) -> Result<(), Error> {
		if names.is_empty() {
			return Err(Error::MissingArgument("package names"));
		}
		for name in names {
			let record = match self.metadb.lookup(OriginKind::Native, name).await.map_err(aurman_rs::Error::from)? {
				Some(r) => Some(r),
				None => self.metadb.lookup(OriginKind::Source, name).await.map_err(aurman_rs::Error::from)?,
			};
			let Some(record) = record else {
				println!("{} was not found", name);
				continue;
			};

			println!("Name            : {}", record.name);
			println!("Version         : {}", record.version);
			println!("Repository      : {}", record.origin);
			println!("Description     : {}", record.description.as_deref().unwrap_or("None"));
			println!("Provides        : {}", if record.provides.is_empty() { "None".to_string() } else { record.provides.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("  ") });
			println!("Depends On      : {}", join_refs(&record.dependencies.runtime));
			println!("Make Deps       : {}", join_refs(&record.dependencies.build));
			println!("Optional Deps   : {}", join_refs(&record.dependencies.optional));
			println!("Conflicts With  : {}", join_refs(&record.conflicts));
			if let Some(installed) = self.pacman.installed_version(&record.name).await {
				println!("Installed       : {}", installed);
			}
			println!();
		}
		Ok(())
	}

	async fn remove(&self, names: &[String]) -> Result<(), Error> {
		if names.is_empty() {
			return Err(Error::MissingArgument("package names"));
		}
		self.pacman.remove(names).await.map_err(aurman_rs::Error::from)?;
		Ok(())
	}
}

fn join_refs(refs: &[PackageRef]) -> String {
	if refs.is_empty() {
		"None".to_string()
	} else {
		refs.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("  ")
	}
}

fn print_plan(plan: &BuildPlan) {
	for action in [Action::InstallBinary, Action::BuildFromSource] {
		let entries = plan.with_action(action).collect::<Vec<_>>();
		if entries.is_empty() {
			continue;
		}
		println!("{} ({}):", match action {
			Action::InstallBinary => "Repository packages to install",
			Action::BuildFromSource => "Packages to build",
			Action::Skip => "Up to date",
		}, entries.len());
		for e in entries {
			println!("\t{} {}", e.name, e.version);
		}
	}
}

fn prompt_provider(name: &str, options: &[String]) -> Result<String, Error> {
	let mut options = options.to_vec();
	options.sort();
	println!("Multiple providers of [{}]. select one.", name);
	for (i, opt) in options.iter().enumerate() {
		print!("{}) {} ", i, opt);
	}
	println!();

	let stdin = std::io::stdin();
	loop {
		print!("> ");
		let _ = std::io::stdout().flush();
		let mut input = String::new();
		if stdin.read_line(&mut input)? == 0 {
			return Err(Error::UserCancelled);
		}
		if let Ok(ans) = input.trim().parse::<usize>() {
			if let Some(choice) = options.get(ans) {
				return Ok(choice.clone());
			}
		}
		println!("Input invalid.")
	}
}

fn confirm(question: &str) -> Result<(), Error> {
	let stdin = std::io::stdin();
	print!("{} [(y)/n] ", question);
	let _ = std::io::stdout().flush();
	loop {
		let mut input = String::new();
		if stdin.read_line(&mut input)? == 0 {
			return Err(Error::UserCancelled);
		}
		let input = input.trim().to_lowercase();
		if input == "y" || input.is_empty() {
			return Ok(());
		} else if input == "n" {
			return Err(Error::UserCancelled);
		} else {
			println!("\nInput invalid.")
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("aurman-rs error: {0}")]
	AurmanError(#[from] aurman_rs::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("Missing argument: {0}")]
	MissingArgument(&'static str),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Unknown command: {0}")]
	UnknownCommand(String),
	#[error("Dependency resolution failed")]
	Resolver,
	#[error("Some packages failed to build or install")]
	Build,
	#[error("User cancelled an action")]
	UserCancelled,
}
