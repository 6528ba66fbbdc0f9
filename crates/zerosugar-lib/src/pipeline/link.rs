//! The stages of a pull.
//! 
//! A stage is attached to start its work and detached once that work is over,
//! detaching decides which stages run next.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use crate::fetch::DownloadMonitor;
use crate::model::*;
use crate::solver::{Rejection, Selection};
use crate::trust::KeyConfirmer;
use crate::{Policy, Session};

use super::Reporter;

/// Work a stage started and has to wait for.
pub type Attached<'a> = Pin<Box<dyn Future<Output = StageEvent> + 'a>>;

/// How the work of an attached stage ended.
#[derive(Debug)]
pub enum StageEvent {
	/// Nothing had to be waited for.
	Skipped,
	Solved(crate::Result<()>),
	Downloaded(Vec<(std::sync::Arc<Implementation>, crate::Error)>),
	Built(crate::Result<std::process::ExitStatus>),
}

/// What to do after a stage.
#[derive(Debug)]
pub enum Detach {
	/// Stages to run next, the last one first. Empty when this branch is done.
	Next(Vec<Link>),
	/// The pull can't succeed.
	Unrecoverable,
}

/// Solving for one interface, shared by every solve kind.
#[derive(Debug, Clone)]
pub struct SolveStage {
	policy: Policy,
	force: bool,
	/// Interfaces already built by this pull, they are never built twice.
	built: BTreeSet<String>,
}

impl SolveStage {
	pub fn new(mut policy: Policy, force: bool) -> Self {
		policy.solver_mut().set_record_details(true);
		Self { policy, force, built: BTreeSet::new() }
	}

	/// A stage for `uri` with the settings of `seed`.
	fn seeded(uri: &str, seed: &SolveStage, session: &Session) -> Self {
		let mut policy = Policy::new(uri, &session.config);
		policy.set_network_use(seed.policy.network_use());
		policy.set_freshness(seed.policy.freshness());
		Self { built: seed.built.clone(), ..Self::new(policy, seed.force) }
	}

	fn name(&self) -> String {
		display_name(self.policy.root())
	}
}

/// Which kind of solve a download came from, it is repeated once the download is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveKind {
	Solve,
	Refresh,
	SolveSource,
}

/// State of an uncached requirement of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
	Pending,
	Failed,
	/// The native package failed, implementations from feeds are tried instead.
	Fallback,
}

#[derive(Debug, Clone)]
pub struct DownloadStage {
	seed: SolveStage,
	kind: SolveKind,
	monitor: DownloadMonitor,
	requires: BTreeMap<String, Requirement>,
}

/// Builds an interface from source with the compile tool.
#[derive(Debug, Clone)]
pub struct BuildStage {
	iface: String,
	/// Solves for the compile tool.
	policy: Policy,
}

#[derive(Debug, Clone)]
pub enum Link {
	Solve(SolveStage),
	/// Checks every feed for updates once.
	Refresh(SolveStage),
	SolveSource(SolveStage),
	Download(DownloadStage),
	Build(BuildStage),
}

impl std::fmt::Display for Link {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Link::Solve(s) => write!(f, "Solve({})", s.name()),
			Link::Refresh(s) => write!(f, "Refresh({})", s.name()),
			Link::SolveSource(s) => write!(f, "SolveSource({})", s.name()),
			Link::Download(d) => write!(f, "Download({})", d.seed.name()),
			Link::Build(b) => write!(f, "Build({})", display_name(&b.iface)),
		}
	}
}

fn solve_link(kind: SolveKind, mut stage: SolveStage) -> Link {
	match kind {
		SolveKind::Solve => Link::Solve(stage),
		SolveKind::Refresh => Link::Refresh(stage),
		SolveKind::SolveSource => {
			stage.policy.set_src(true);
			Link::SolveSource(stage)
		},
	}
}

/// Whether `iface` can be built, it or one of its feeds provides source code.
fn has_source(iface: &str, session: &Session) -> bool {
	let references = session.catalog.feed_references(iface).unwrap_or_default();
	if references.iter().any(FeedReference::is_source) {
		return true;
	}
	match session.catalog.get_feed(iface) {
		Ok(Some(feed)) => feed.implementations.values().any(|i| i.is_source()),
		_ => false,
	}
}

/// Short summary of why nothing was chosen for `iface`.
fn failure_reason(stage: &SolveStage, iface: &str) -> String {
	let reasons: Vec<String> = stage.policy.solution()
		.and_then(|s| s.details.as_ref())
		.and_then(|d| d.get(iface))
		.map(|candidates| candidates.iter()
			.filter_map(|(implementation, reason)| reason.as_ref().map(|r| format!("{}: {}", implementation.version, r)))
			.collect())
		.unwrap_or_default();

	if reasons.is_empty() {
		"Unknown".to_string()
	} else {
		reasons.join(", ")
	}
}

/// Whether a usable candidate of `iface` was only turned down because of its dependencies.
fn blocked_by_dependencies(stage: &SolveStage, iface: &str) -> bool {
	stage.policy.solution()
		.and_then(|s| s.details.as_ref())
		.and_then(|d| d.get(iface))
		.is_some_and(|candidates| candidates.iter().any(|(_, reason)| *reason == Some(Rejection::IncompatibleDependencies)))
}

impl Link {
	/// A solve for a root interface, `force` refetches its feeds.
	pub fn solve(policy: Policy, force: bool) -> Self {
		Link::Solve(SolveStage::new(policy, force))
	}

	/// A single pass over the feeds of a root interface, fetching all of them.
	pub fn refresh(mut policy: Policy) -> Self {
		policy.set_network_use(crate::NetworkUse::Full);
		Link::Refresh(SolveStage::new(policy, true))
	}

	pub fn policy(&self) -> &Policy {
		match self {
			Link::Solve(s) | Link::Refresh(s) | Link::SolveSource(s) => &s.policy,
			Link::Download(d) => &d.seed.policy,
			Link::Build(b) => &b.policy,
		}
	}

	pub fn policy_mut(&mut self) -> &mut Policy {
		match self {
			Link::Solve(s) | Link::Refresh(s) | Link::SolveSource(s) => &mut s.policy,
			Link::Download(d) => &mut d.seed.policy,
			Link::Build(b) => &mut b.policy,
		}
	}

	/// Whether the work can be dropped halfway. Builds always run to the end.
	pub fn interruptible(&self) -> bool {
		!matches!(self, Link::Build(_))
	}

	/// Where progress comes from, `None` when it can't be measured.
	pub fn progress_probe(&self) -> Option<DownloadMonitor> {
		match self {
			Link::Download(d) => Some(d.monitor.clone()),
			_ => None,
		}
	}

	/// Starts the stage's work.
	/// 
	/// # Returns
	/// `None` when there is nothing to wait for.
	pub fn attach<'a>(&'a mut self, session: &'a Session, reporter: &'a Reporter, confirmer: &'a KeyConfirmer)
	-> crate::Result<Option<Attached<'a>>> {
		match self {
			Link::Solve(stage) | Link::SolveSource(stage) => {
				if stage.force || !stage.policy.ready() {
					reporter.verbose(format!("Download feed for service {}:", stage.name()));
				} else {
					reporter.verbose(format!("Download requirements for service {}:", stage.name()));
				}
				let force = stage.force;
				let policy = &mut stage.policy;
				Ok(Some(Box::pin(async move {
					let monitor = DownloadMonitor::new();
					StageEvent::Solved(policy.solve_with_downloads(session, confirmer, &monitor, force).await)
				})))
			},
			Link::Refresh(stage) => {
				reporter.verbose(format!("Refresh feed for service {}:", stage.name()));
				let policy = &mut stage.policy;
				Ok(Some(Box::pin(async move {
					let monitor = DownloadMonitor::new();
					StageEvent::Solved(policy.solve_with_downloads(session, confirmer, &monitor, true).await)
				})))
			},
			Link::Download(stage) => {
				reporter.verbose(format!("Download files for service {}:", stage.seed.name()));
				let uncached = stage.seed.policy.uncached_implementations(session);
				if uncached.is_empty() {
					return Ok(None);
				}
				for (iface, _) in uncached {
					stage.requires.insert(iface, Requirement::Pending);
				}
				let policy = &stage.seed.policy;
				let monitor = &stage.monitor;
				Ok(Some(Box::pin(async move {
					StageEvent::Downloaded(policy.download_uncached_implementations(session, monitor).await)
				})))
			},
			Link::Build(stage) => {
				reporter.verbose(format!("Build service {} from sources:", display_name(&stage.iface)));
				stage.policy.solve(session);
				let main = stage.policy.main_path(session)?;
				let environ = stage.policy.environ(session)?;
				let iface = stage.iface.as_str();
				Ok(Some(Box::pin(async move {
					StageEvent::Built(super::build::autocompile(&main, iface, environ, reporter).await)
				})))
			},
		}
	}

	/// Decides what follows once the attached work is over.
	pub fn detach(self, event: StageEvent, session: &Session, reporter: &Reporter) -> Detach {
		match self {
			Link::Solve(stage) => detach_solve(stage, event, session, reporter),
			Link::Refresh(_) => Detach::Next(Vec::new()),
			Link::SolveSource(stage) => {
				if let StageEvent::Solved(Err(e)) = &event {
					reporter.verbose(e.to_string());
				}
				if stage.policy.ready() {
					reporter.verbose("* sources found;");
					Detach::Next(vec![Link::Download(DownloadStage::new(stage, SolveKind::SolveSource))])
				} else {
					reporter.verbose("* failed to find sources;");
					Detach::Unrecoverable
				}
			},
			Link::Download(stage) => detach_download(stage, event, session, reporter),
			Link::Build(stage) => match event {
				StageEvent::Built(Ok(status)) if status.success() => {
					reporter.verbose("* done;");
					session.catalog.invalidate(&stage.iface);
					Detach::Next(Vec::new())
				},
				StageEvent::Built(Err(e)) => {
					reporter.verbose(e.to_string());
					reporter.verbose("* failed to build;");
					Detach::Unrecoverable
				},
				_ => {
					reporter.verbose("* failed to build;");
					Detach::Unrecoverable
				},
			},
		}
	}
}

impl DownloadStage {
	fn new(seed: SolveStage, kind: SolveKind) -> Self {
		Self { seed, kind, monitor: DownloadMonitor::new(), requires: BTreeMap::new() }
	}
}

fn detach_solve(mut stage: SolveStage, event: StageEvent, session: &Session, reporter: &Reporter) -> Detach {
	if let StageEvent::Solved(Err(e)) = &event {
		reporter.verbose(e.to_string());
		return Detach::Unrecoverable;
	}
	let Some(solution) = stage.policy.solution().cloned() else { return Detach::Unrecoverable };

	if solution.ready {
		for (iface, _) in solution.implementations() {
			reporter.verbose(format!("* {} done;", display_name(iface)));
		}
		return if stage.policy.need_download(session) {
			Detach::Next(vec![Link::Download(DownloadStage::new(stage, SolveKind::Solve))])
		} else {
			Detach::Next(Vec::new())
		};
	}

	let mut failed = false;
	let mut need_build = false;
	let mut builds = Vec::new();
	for (iface, selection) in &solution.selections {
		match selection {
			Selection::Resolved(_) => reporter.verbose(format!("* {} done;", display_name(iface))),
			Selection::Unresolved if !stage.built.contains(iface) && has_source(iface, session) => {
				reporter.verbose(format!("* {} needs to be built from sources;", display_name(iface)));
				builds.push(iface.clone());
				need_build = true;
			},
			Selection::Unresolved | Selection::InProgress => {
				reporter.verbose(format!("* {} failed to resolve due to \"{}\";", display_name(iface), failure_reason(&stage, iface)));
				/* Waiting on dependencies may still work out once they are built */
				if !blocked_by_dependencies(&stage, iface) {
					failed = true;
				}
			},
		}
	}

	if failed || !need_build {
		return Detach::Unrecoverable;
	}
	stage.built.extend(builds.iter().cloned());

	/* Runs last, once everything was built */
	let mut next = vec![Link::Solve(SolveStage::seeded(stage.policy.root(), &stage, session))];
	for iface in &builds {
		let compile = Policy::new(session.config.compile_interface(), &session.config);
		next.push(Link::Build(BuildStage { iface: iface.clone(), policy: compile }));
		next.push(solve_link(SolveKind::SolveSource, SolveStage::seeded(iface, &stage, session)));
	}

	/* The compile tool has to be there before anything is built */
	let compile = SolveStage::seeded(session.config.compile_interface(), &stage, session);
	reporter.verbose(format!("* add {};", compile.name()));
	next.push(Link::Solve(compile));
	Detach::Next(next)
}

fn detach_download(mut stage: DownloadStage, event: StageEvent, session: &Session, reporter: &Reporter) -> Detach {
	if let StageEvent::Downloaded(failures) = &event {
		for (implementation, e) in failures {
			log::debug!("Download of {} failed: {}", implementation, e);
		}
	}
	if stage.requires.is_empty() {
		return Detach::Next(Vec::new());
	}

	if stage.seed.policy.need_download(session) {
		for (iface, implementation) in stage.seed.policy.uncached_implementations(session) {
			if implementation.is_distribution() {
				session.catalog.set_stability(&implementation.feed, &implementation.id, Stability::Insecure);
				stage.requires.insert(iface, Requirement::Fallback);
			} else {
				stage.requires.insert(iface, Requirement::Failed);
			}
		}
	}

	for (iface, state) in &stage.requires {
		let name = display_name(iface);
		match state {
			Requirement::Pending => reporter.verbose(format!("* {} done;", name)),
			Requirement::Failed => reporter.verbose(format!("* {} failed;", name)),
			Requirement::Fallback => reporter.verbose(format!("* {} failed from native packaging system, will try pure zero ones;", name)),
		}
	}

	if stage.requires.values().any(|r| *r == Requirement::Failed) {
		Detach::Unrecoverable
	} else if stage.requires.values().all(|r| *r == Requirement::Pending) {
		Detach::Next(Vec::new())
	} else {
		let again = SolveStage::seeded(stage.seed.policy.root(), &stage.seed, session);
		Detach::Next(vec![solve_link(stage.kind, again)])
	}
}
