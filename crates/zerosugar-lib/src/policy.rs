//! What to solve for and how, plus everything done with the result.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::DiGraph;
use petgraph::visit::{depth_first_search, DfsEvent};

use crate::fetch::DownloadMonitor;
use crate::model::*;
use crate::solver::Solution;
use crate::trust::KeyConfirmer;
use crate::{NetworkUse, Session, Solver};

/// Solve settings for one root interface and the last solution found.
#[derive(Debug, Clone)]
pub struct Policy {
	root: String,
	freshness: u64,
	/// Solve for source code that builds binaries for `target`.
	src: bool,
	target: Architecture,
	solver: Solver,
	solution: Option<Solution>,
}

impl Policy {
	/// # Parameters
	/// - `root` - Canonical URI of the interface to run.
	pub fn new(root: impl Into<String>, config: &crate::Config) -> Self {
		Self {
			root: root.into(),
			freshness: config.freshness(),
			src: false,
			target: config.target_arch(),
			solver: Solver::new(config),
			solution: None,
		}
	}

	pub fn root(&self) -> &str {
		&self.root
	}

	pub fn network_use(&self) -> NetworkUse {
		self.solver.network_use()
	}
	pub fn set_network_use(&mut self, network_use: NetworkUse) {
		self.solver.set_network_use(network_use);
	}

	/// Seconds after which a feed should be checked for updates, 0 never.
	pub fn freshness(&self) -> u64 {
		self.freshness
	}
	pub fn set_freshness(&mut self, freshness: u64) {
		self.freshness = freshness;
	}

	pub fn src(&self) -> bool {
		self.src
	}
	pub fn set_src(&mut self, src: bool) {
		self.src = src;
	}

	pub fn solver_mut(&mut self) -> &mut Solver {
		&mut self.solver
	}

	/// Architecture the solver works with.
	pub fn arch(&self) -> Architecture {
		if self.src {
			Architecture::source(self.target.clone())
		} else {
			self.target.clone()
		}
	}

	/// The result of the last solve, if there was one.
	pub fn solution(&self) -> Option<&Solution> {
		self.solution.as_ref()
	}

	pub fn ready(&self) -> bool {
		self.solution.as_ref().is_some_and(|s| s.ready)
	}

	fn ready_solution(&self) -> crate::Result<&Solution> {
		self.solution.as_ref()
			.filter(|s| s.ready)
			.ok_or_else(|| crate::Error::NotReady(self.root.clone()))
	}

	/// Solves with whatever is in the cache now.
	pub fn solve(&mut self, session: &Session) -> &Solution {
		let solution = self.solver.solve(session, &self.root, &self.arch());
		self.solution.insert(solution)
	}

	/// Selected implementations that are not available locally, by interface.
	pub fn uncached_implementations(&self, session: &Session) -> Vec<(String, Arc<Implementation>)> {
		let Some(solution) = &self.solution else { return Vec::new() };
		solution.implementations()
			.filter(|(_, implementation)| !session.is_cached(implementation))
			.map(|(iface, implementation)| (iface.clone(), implementation.clone()))
			.collect()
	}

	/// Whether anything has to be fetched before the root can run.
	/// 
	/// Solves first. Off-line nothing can be fetched, so the answer is always no.
	pub fn need_download(&mut self, session: &Session) -> bool {
		let ready = self.solve(session).ready;
		if self.network_use() == NetworkUse::Offline {
			return false;
		}
		!ready || !self.uncached_implementations(session).is_empty()
	}

	/// Whether a feed is due to be checked for updates.
	/// 
	/// # Parameters
	/// - `url` - Where the feed comes from.
	/// - `feed` - The cached copy, `None` if there isn't one.
	pub fn is_stale(&self, url: &str, feed: Option<&Feed>, session: &Session) -> bool {
		if is_local_uri(url) {
			return false;
		}
		let Some(feed) = feed.filter(|f| f.last_modified.is_some()) else { return true };

		let now = crate::catalog::now();
		let last_checked = feed.last_checked.or(feed.last_modified).unwrap_or(0);
		if self.freshness == 0 || now.saturating_sub(last_checked) < self.freshness {
			return false;
		}
		if let Some(attempt) = session.catalog.last_check_attempt(url) {
			if attempt + crate::catalog::FAILED_CHECK_DELAY > now {
				log::debug!("Feed {} was checked recently, not stale", url);
				return false;
			}
		}
		true
	}

	/// Whether any feed the last solve read is stale, solving first if there was no solve yet.
	pub fn any_stale(&mut self, session: &Session) -> bool {
		if self.solution.is_none() {
			self.solve(session);
		}
		let Some(solution) = &self.solution else { return false };
		solution.feeds_used.iter().any(|url| {
			let feed = session.catalog.get_feed(url).unwrap_or_else(|e| {
				log::warn!("Failed to load feed {}: {}", url, e);
				None
			});
			self.is_stale(url, feed.as_deref(), session)
		})
	}

	/// Solves, downloading feeds until the solution can't be improved.
	/// 
	/// Feeds that are missing or stale are fetched when the solve isn't ready. `force` fetches
	/// every remote feed used. Once anything was fetched every newly used feed is fetched too.
	/// Each feed is fetched at most once. Failed downloads are logged and skipped.
	pub async fn solve_with_downloads(&mut self, session: &Session, confirmer: &KeyConfirmer, monitor: &DownloadMonitor, mut force: bool)
	-> crate::Result<()> {
		let mut attempted = std::collections::HashSet::<String>::new();
		loop {
			let solution = self.solve(session).clone();
			if solution.ready && !force {
				break;
			}
			if self.network_use() == NetworkUse::Offline {
				log::debug!("Off-line, not downloading feeds for {}", self.root);
				break;
			}

			let mut wanted = Vec::new();
			for url in &solution.feeds_used {
				if is_local_uri(url) || attempted.contains(url) {
					continue;
				}
				let feed = session.catalog.get_feed(url).unwrap_or_else(|e| {
					log::warn!("Failed to load feed {}: {}", url, e);
					None
				});
				if force || self.is_stale(url, feed.as_deref(), session) {
					wanted.push(url.clone());
				}
			}

			if wanted.is_empty() {
				if force {
					break;
				}
				/* Nothing stale but still not ready, try fetching everything */
				force = true;
				continue;
			}

			for url in wanted {
				attempted.insert(url.clone());
				log::info!("Downloading feed {}", url);
				if let Err(e) = session.fetcher.download_and_import_feed(&url, session, confirmer, monitor).await {
					log::warn!("Failed to download feed {}: {}", url, e);
				}
			}
			force = true;
		}
		Ok(())
	}

	/// Fetches every selected implementation that is not cached, one at a time.
	/// 
	/// # Returns
	/// The implementations that failed and why.
	pub async fn download_uncached_implementations(&self, session: &Session, monitor: &DownloadMonitor)
	-> Vec<(Arc<Implementation>, crate::Error)> {
		let downloads: Vec<_> = self.uncached_implementations(session).into_iter()
			.map(|(iface, implementation)| {
				let progress = monitor.start(&implementation.id, crate::Fetcher::expected_size(&implementation));
				(iface, implementation, progress)
			})
			.collect();

		let mut failures = Vec::new();
		for (iface, implementation, progress) in downloads {
			log::info!("Downloading {} for {}", implementation, iface);
			let result = session.fetcher.download_implementation(&implementation, session, &progress).await;
			progress.finish();
			if let Err(e) = result {
				log::warn!("Failed to download {}: {}", implementation, e);
				failures.push((implementation, e));
			}
		}
		failures
	}

	/// The process environment with the bindings of every selected implementation applied.
	/// 
	/// Walks the selections depth first from the root, each implementation is visited once.
	/// Native packages have no path and bind nothing.
	pub fn environ(&self, session: &Session) -> crate::Result<HashMap<String, String>> {
		let solution = self.ready_solution()?;

		let mut graph = DiGraph::<&str, &Dependency>::new();
		let mut nodes = HashMap::new();
		for (iface, _) in solution.implementations() {
			nodes.insert(iface.as_str(), graph.add_node(iface.as_str()));
		}
		for (iface, requires) in &solution.requires {
			let Some(from) = nodes.get(iface.as_str()) else { continue };
			for dependency in requires {
				if let Some(to) = nodes.get(dependency.interface.as_str()) {
					graph.add_edge(*from, *to, dependency);
				}
			}
		}
		let root = *nodes.get(self.root.as_str()).ok_or_else(|| crate::Error::NotReady(self.root.clone()))?;

		let mut visits = Vec::<(Option<&Dependency>, &str)>::new();
		depth_first_search(&graph, Some(root), |event| match event {
			DfsEvent::Discover(node, _) if node == root => visits.push((None, graph[node])),
			DfsEvent::TreeEdge(from, to) => {
				let dependency = graph.find_edge(from, to).map(|e| graph[e]);
				visits.push((dependency, graph[to]));
			},
			_ => {},
		});

		let mut environ: HashMap<String, String> = std::env::vars().collect();
		for (dependency, iface) in visits {
			let Some(implementation) = solution.selected(iface) else { continue };
			let Some(path) = session.implementation_path(implementation)? else { continue };
			let path_text = path.to_string_lossy().to_string();

			let bindings = dependency.into_iter()
				.flat_map(|d| d.bindings.iter())
				.chain(implementation.bindings.iter());
			for binding in bindings {
				let current = environ.get(&binding.name).cloned();
				if current.as_deref().is_some_and(|c| c.contains(&path_text)) {
					continue;
				}
				let value = binding.get_value(&path, current.as_deref());
				log::trace!("{}={}", binding.name, value);
				environ.insert(binding.name.clone(), value);
			}
		}
		Ok(environ)
	}

	/// Full path of the root implementation's main executable.
	pub fn main_path(&self, session: &Session) -> crate::Result<std::path::PathBuf> {
		let solution = self.ready_solution()?;
		let root = solution.selected(&self.root).ok_or_else(|| crate::Error::NotReady(self.root.clone()))?;
		let main = root.main.as_deref()
			.ok_or_else(|| crate::Error::Validation(format!("{} has no main executable", root)))?;
		let path = session.implementation_path(root)?
			.ok_or_else(|| crate::Error::Validation(format!("{} is a native package, it has no path", root)))?;
		Ok(path.join(main.trim_start_matches('/')))
	}
}
