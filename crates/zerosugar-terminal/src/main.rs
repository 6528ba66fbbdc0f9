use std::io::Write;
use std::sync::Arc;

use zerosugar::pipeline::{PipelineEvent, PipelineHandle, PullOutcome};
use zerosugar::{NetworkUse, Pipeline, Session};

#[tokio::main]
async fn main() {
	env_logger::init();

	let mut opts;

	/* Parse console input */
	let parsed_options = {
		let args: Vec<String> = std::env::args().collect();

		opts = getopts::Options::new();
		opts.optflag( "h", "help",      "Show help");
		opts.optflag( "v", "verbose",   "Show download progress");
		opts.optflag( "f", "force",     "Fetch feeds even if nothing is missing");
		opts.optflag( "o", "offline",   "Don't use the network");
		opts.optflag( "m", "minimal",   "Prefer what is cached over newer versions");
		opts.optopt(  "",  "freshness", "Seconds after which feeds are checked for updates", "SECONDS");
		opts.parsing_style(getopts::ParsingStyle::StopAtFirstFree);

		let parsed_options = match opts.parse(&args[1..]) {
			Ok(m)  => { m }
			Err(e) => { println!("Unable to parse options: {}", e); return }
		};

		if parsed_options.opt_present("h") || parsed_options.free.is_empty() {
			eprintln!("{}", opts.usage("Usage: zerosugar [options] (pull|refresh|stale|run) URI..."));
			return;
		}

		parsed_options
	};

	let config = zerosugar::Config::load_from_disk().unwrap_or_else(|e| {
		log::warn!("Failed to read config file: {}", e);
		log::warn!("Using default config.");
		zerosugar::Config::default()
	});

	let session = match Session::new(config) {
		Ok(s) => Arc::new(s),
		Err(e) => { log::error!("Failed to open the cache: {}", e); std::process::exit(1) }
	};

	let network_use = if parsed_options.opt_present("o") {
		Some(NetworkUse::Offline)
	} else if parsed_options.opt_present("m") {
		Some(NetworkUse::Minimal)
	} else {
		None
	};
	let freshness = match parsed_options.opt_get::<u64>("freshness") {
		Ok(f) => f,
		Err(e) => { log::error!("Invalid freshness: {}", e); std::process::exit(2) }
	};
	let verbose = parsed_options.opt_present("v");
	let force = parsed_options.opt_present("f");

	let command = parsed_options.free[0].as_str();
	let arguments = &parsed_options.free[1..];

	let result = match command {
		"pull" => pull(session, arguments, network_use, force, verbose).await.map(|_| 0),
		"refresh" => refresh(session, arguments, freshness, verbose).await.map(|_| 0),
		"stale" => stale(session, arguments, freshness).await,
		"run" => run(session, arguments, network_use, verbose).await,
		_ => Err(Error::UnknownCommand(command.to_string())),
	};

	match result {
		Ok(code) => std::process::exit(code),
		Err(e) => {
			log::error!("{}", e);
			eprintln!("{}", e);
			std::process::exit(1);
		}
	}
}

fn ask(question: &str) -> bool {
	let stdin = std::io::stdin();
	loop {
		print!("{} [y/(n)] ", question);
		let _ = std::io::stdout().flush();
		let mut input = String::new();
		if stdin.read_line(&mut input).is_err() {
			return false;
		}
		let input = input.trim().to_lowercase();
		if input == "y" {
			return true;
		} else if input == "n" || input.is_empty() {
			return false;
		}
		println!("Input invalid.")
	}
}

/// Prints what the pipeline reports and answers its questions until it is done.
async fn follow(mut events: tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>, handle: PipelineHandle, verbose: bool) {
	while let Some(event) = events.recv().await {
		match event {
			PipelineEvent::Verbose(line) => println!("{}", line),
			PipelineEvent::Progress(Some(fraction)) if verbose => println!("{:.0}%", fraction * 100.0),
			PipelineEvent::Progress(_) => {},
			PipelineEvent::KeyConfirm(key) => {
				let question = format!("Trust key {} of {} for {}?", key.fingerprint, key.user_id, key.domain);
				let trusted = tokio::task::spawn_blocking(move || ask(&question)).await.unwrap_or(false);
				if trusted {
					handle.accept(key);
				} else {
					handle.deny();
				}
			},
			PipelineEvent::Finished | PipelineEvent::Cancelled => break,
		}
	}
}

async fn pull(session: Arc<Session>, feeds: &[String], network_use: Option<NetworkUse>, force: bool, verbose: bool) -> Result<Pipeline, Error> {
	if feeds.is_empty() {
		return Err(Error::MissingArgument);
	}
	let (mut pipeline, handle, events) = Pipeline::new(session);
	let (outcome, _) = tokio::join!(
		pipeline.pull(feeds, network_use, force),
		follow(events, handle, verbose),
	);
	match outcome {
		PullOutcome::Finished => Ok(pipeline),
		PullOutcome::Cancelled => Err(Error::Cancelled),
	}
}

async fn refresh(session: Arc<Session>, feeds: &[String], freshness: Option<u64>, verbose: bool) -> Result<(), Error> {
	if feeds.is_empty() {
		return Err(Error::MissingArgument);
	}
	let (mut pipeline, handle, events) = Pipeline::new(session);
	let (outcome, _) = tokio::join!(
		pipeline.refresh(feeds, freshness),
		follow(events, handle, verbose),
	);
	match outcome {
		PullOutcome::Finished => Ok(()),
		PullOutcome::Cancelled => Err(Error::Cancelled),
	}
}

/// Exits with 0 when the interface has feeds due for a check, 1 otherwise.
async fn stale(session: Arc<Session>, feeds: &[String], freshness: Option<u64>) -> Result<i32, Error> {
	let mut pipeline = pull(session, feeds, Some(NetworkUse::Offline), false, false).await?;
	if let (Some(freshness), Some(policy)) = (freshness, pipeline.policy_mut()) {
		policy.set_freshness(freshness);
	}
	let stale = pipeline.is_stale();
	println!("{}", if stale { "stale" } else { "fresh" });
	Ok(if stale { 0 } else { 1 })
}

/// Pulls an interface and runs its main with the remaining arguments.
async fn run(session: Arc<Session>, arguments: &[String], network_use: Option<NetworkUse>, verbose: bool) -> Result<i32, Error> {
	let (uri, args) = arguments.split_first().ok_or(Error::MissingArgument)?;
	let pipeline = pull(session.clone(), std::slice::from_ref(uri), network_use, false, verbose).await?;
	let policy = pipeline.policy().ok_or(Error::Cancelled)?;

	let main = policy.main_path(&session)?;
	let environ = policy.environ(&session)?;
	log::info!("Running {}", main.display());
	let status = tokio::process::Command::new(&main)
		.args(args)
		.env_clear()
		.envs(environ)
		.status()
		.await
		.map_err(zerosugar::Error::from)?;
	Ok(status.code().unwrap_or(1))
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("zerosugar error: {0}")]
	Zerosugar(#[from] zerosugar::Error),
	#[error("Missing argument")]
	MissingArgument,
	#[error("Unknown command {0}")]
	UnknownCommand(String),
	#[error("Pull was cancelled")]
	Cancelled,
}
