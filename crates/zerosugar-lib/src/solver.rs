//! Chooses one implementation per interface so the whole selection can run.
//! 
//! Depth first with backtracking over candidates, most preferred first.
//! Each interface gets at most one selection for the whole solve.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::model::*;
use crate::model::arch::{machine_group, SOURCE_MACHINE};
use crate::NetworkUse;

pub mod ordering;
pub use ordering::{Candidate, CandidateOrder, Rejection};

/// What the solve knows about an interface.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
	/// Its candidates are being tried further up the stack.
	InProgress,
	/// Mandatory and nothing fit.
	Unresolved,
	Resolved(Arc<Implementation>),
}

impl Selection {
	pub fn implementation(&self) -> Option<&Arc<Implementation>> {
		match self {
			Selection::Resolved(implementation) => Some(implementation),
			_ => None,
		}
	}
}

pub type Details = HashMap<String, Vec<(Arc<Implementation>, Option<Rejection>)>>;

/// Result of one solve.
#[derive(Debug, Clone, Default)]
pub struct Solution {
	/// Whether the root and everything it needs was resolved.
	pub ready: bool,
	pub selections: BTreeMap<String, Selection>,
	/// Dependencies of each selected implementation that were followed.
	pub requires: HashMap<String, Vec<Dependency>>,
	/// Every feed read during the solve, including ones that turned out useless.
	pub feeds_used: BTreeSet<String>,
	/// Each candidate that was looked at and why it lost, when recording is on.
	pub details: Option<Details>,
}

impl Solution {
	pub fn selected(&self, iface: &str) -> Option<&Arc<Implementation>> {
		self.selections.get(iface).and_then(Selection::implementation)
	}

	/// Every chosen implementation, by interface.
	pub fn implementations(&self) -> impl Iterator<Item = (&String, &Arc<Implementation>)> {
		self.selections.iter().filter_map(|(iface, s)| s.implementation().map(|i| (iface, i)))
	}

	/// Interfaces that were needed but couldn't be resolved.
	pub fn unresolved(&self) -> impl Iterator<Item = &String> {
		self.selections.iter().filter(|(_, s)| **s == Selection::Unresolved).map(|(iface, _)| iface)
	}
}

/// Solver settings, reusable across solves.
#[derive(Debug, Clone, Default)]
pub struct Solver {
	network_use: NetworkUse,
	help_with_testing: bool,
	/// Extra restrictions applied to every request for an interface.
	extra_restrictions: HashMap<String, Vec<Restriction>>,
	record_details: bool,
}

impl Solver {
	pub fn new(config: &crate::Config) -> Self {
		Self {
			network_use: config.network_use(),
			help_with_testing: config.help_with_testing(),
			..Default::default()
		}
	}

	pub fn network_use(&self) -> NetworkUse {
		self.network_use
	}
	pub fn set_network_use(&mut self, network_use: NetworkUse) {
		self.network_use = network_use;
	}

	pub fn set_help_with_testing(&mut self, help_with_testing: bool) {
		self.help_with_testing = help_with_testing;
	}

	pub fn add_restriction(&mut self, iface: impl Into<String>, restriction: Restriction) {
		self.extra_restrictions.entry(iface.into()).or_default().push(restriction);
	}

	/// Keep every candidate and its rejection in [`Solution::details`].
	pub fn set_record_details(&mut self, record: bool) {
		self.record_details = record;
	}

	/// Select implementations for `root` and everything it needs on `arch`.
	/// 
	/// Only reads what is already in the catalog, downloading is up to the caller.
	pub fn solve(&self, session: &crate::Session, root: &str, arch: &Architecture) -> Solution {
		log::debug!("Solve for {} on {}-{}", root, arch.os.as_deref().unwrap_or("*"), arch.machine.as_deref().unwrap_or("*"));
		let mut state = SolveState {
			session,
			solver: self,
			machine_group: None,
			cached: HashMap::new(),
			solution: Solution {
				details: self.record_details.then(HashMap::new),
				..Default::default()
			},
		};
		let ready = state.process(&Dependency::new(root), arch);
		let mut solution = state.solution;
		solution.ready = ready && solution.selected(root).is_some();
		log::debug!("Solve for {} is {}", root, if solution.ready { "ready" } else { "not ready" });
		solution
	}
}

/// Everything one call to [`Solver::solve`] threads through the recursion.
struct SolveState<'a> {
	session: &'a crate::Session,
	solver: &'a Solver,
	/// Locked by the first machine specific selection.
	machine_group: Option<u32>,
	cached: HashMap<String, bool>,
	solution: Solution,
}

impl<'a> SolveState<'a> {
	fn order(&self, stability_policy: Option<Stability>) -> CandidateOrder {
		CandidateOrder {
			network_use: self.solver.network_use,
			help_with_testing: self.solver.help_with_testing,
			machine_group: self.machine_group,
			stability_policy,
		}
	}

	fn is_cached(&mut self, implementation: &Implementation) -> bool {
		if let Some(cached) = self.cached.get(&implementation.id) {
			return *cached;
		}
		let cached = self.session.is_cached(implementation);
		self.cached.insert(implementation.id.clone(), cached);
		cached
	}

	fn record(&mut self, iface: &str, implementation: &Arc<Implementation>, rejection: Option<Rejection>) {
		if let Some(details) = &mut self.solution.details {
			details.entry(iface.to_string()).or_default().push((implementation.clone(), rejection));
		}
	}

	/// Feeds that may hold implementations of `iface` on `arch`, its own first.
	fn usable_feeds(&self, iface: &str, arch: &Architecture) -> Vec<String> {
		let mut feeds = vec![iface.to_string()];
		match self.session.catalog.feed_references(iface) {
			Ok(references) => {
				for reference in references {
					if reference.is_compatible(arch) {
						feeds.push(reference.uri);
					} else {
						log::trace!("Skip feed {} of {}, wrong architecture", reference.uri, iface);
					}
				}
			}
			Err(e) => log::warn!("Failed to read feeds of {}: {}", iface, e),
		}
		feeds
	}

	fn candidates(&mut self, iface: &str, arch: &Architecture) -> Vec<Candidate> {
		let mut implementations = Vec::new();
		for url in self.usable_feeds(iface, arch) {
			self.solution.feeds_used.insert(url.clone());
			let feed = match self.session.catalog.get_feed(&url) {
				Ok(Some(feed)) => feed,
				Ok(None) => continue,
				Err(e) => {
					log::warn!("Failed to load feed {} for {}: {}", url, iface, e);
					continue;
				}
			};
			if feed.last_modified.is_none() {
				log::debug!("Feed {} was never downloaded", url);
				continue;
			}
			if url != iface && !feed.feed_for.contains(iface) {
				log::info!("Missing feed-for element for {} in {}", iface, url);
			}
			implementations.extend(feed.implementations.values().cloned());
		}
		implementations.into_iter()
			.map(|implementation| {
				let cached = self.is_cached(&implementation);
				Candidate { implementation, cached }
			})
			.collect()
	}

	/// Resolve one dependency edge, `true` when something was selected for it.
	/// 
	/// An optional edge with nothing suitable returns `false` but leaves no selection behind,
	/// the caller doesn't follow it and the parent stays satisfied.
	fn process(&mut self, dependency: &Dependency, arch: &Architecture) -> bool {
		let iface = dependency.interface.as_str();
		let mut restrictions = dependency.restrictions.clone();
		if let Some(extra) = self.solver.extra_restrictions.get(iface) {
			restrictions.extend(extra.iter().cloned());
		}

		match self.solution.selections.get(iface) {
			Some(Selection::Resolved(existing)) => {
				let implementation = existing.clone();
				let cached = self.is_cached(&implementation);
				let existing = Candidate { implementation, cached };
				return match self.order(None).unusable_reason(&existing, &restrictions, arch) {
					None => true,
					Some(reason) => {
						log::warn!("Implementation {} of {} doesn't suit another request: {}", existing.implementation, iface, reason);
						false
					}
				};
			}
			Some(_) => {
				log::debug!("{} is requested again before it was resolved", iface);
				return false;
			}
			None => {}
		}
		self.solution.selections.insert(iface.to_string(), Selection::InProgress);
		if let Some(details) = &mut self.solution.details {
			details.insert(iface.to_string(), Vec::new());
		}

		let stability_policy = self.session.catalog.get_interface(iface).stability_policy;
		let mut candidates = self.candidates(iface, arch);
		{
			let order = self.order(stability_policy);
			candidates.sort_by(|a, b| order.compare(a, b, &restrictions, arch));
		}
		log::trace!("{} candidates for {}", candidates.len(), iface);

		let mut remaining: VecDeque<Candidate> = candidates.into();
		let mut best = None;
		while best.is_none() {
			let Some(candidate) = remaining.pop_front() else { break };
			self.solution.requires.insert(iface.to_string(), Vec::new());

			if dependency.is_optional() && !candidate.cached {
				continue;
			}
			if let Some(reason) = self.order(stability_policy).unusable_reason(&candidate, &restrictions, arch) {
				log::debug!("{} of {} is unusable: {}", candidate.implementation, iface, reason);
				self.record(iface, &candidate.implementation, Some(reason));
				continue;
			}

			let implementation = candidate.implementation;
			let mut locked_group = false;
			if self.machine_group.is_none() {
				if let Some(machine) = implementation.machine.as_deref().filter(|m| *m != SOURCE_MACHINE) {
					self.machine_group = Some(machine_group(Some(machine)));
					locked_group = true;
				}
			}

			let before: HashSet<String> = self.solution.selections.keys().cloned().collect();
			let mut satisfied = true;
			let mut followed = Vec::new();
			for requirement in &implementation.requires {
				if !arch.uses.contains(&requirement.use_tag) {
					log::trace!("Skip {} of {}, not used here", requirement.interface, implementation);
					continue;
				}
				if self.process(requirement, arch.child_arch()) {
					followed.push(requirement.clone());
				} else if !requirement.is_optional() {
					log::debug!("{} of {} needs {} which can't be resolved", implementation, iface, requirement.interface);
					satisfied = false;
					break;
				}
			}
			self.solution.requires.insert(iface.to_string(), followed);

			/* The last candidate keeps what its dependencies left behind, it shows what failed */
			if !satisfied && !remaining.is_empty() {
				self.solution.selections.retain(|key, _| before.contains(key));
				if locked_group {
					self.machine_group = None;
				}
			}

			if satisfied {
				self.record(iface, &implementation, None);
				best = Some(implementation);
			} else {
				self.record(iface, &implementation, Some(Rejection::IncompatibleDependencies));
			}
		}

		if self.solution.details.is_some() {
			let order = self.order(stability_policy);
			for candidate in remaining {
				let reason = order.unusable_reason(&candidate, &restrictions, arch).unwrap_or(Rejection::NotProcessed);
				self.record(iface, &candidate.implementation, Some(reason));
			}
		}

		match best {
			Some(implementation) => {
				log::debug!("Select {} for {}", implementation, iface);
				self.solution.selections.insert(iface.to_string(), Selection::Resolved(implementation));
				true
			}
			None if dependency.is_optional() => {
				log::debug!("Nothing suitable for optional {}", iface);
				self.solution.selections.remove(iface);
				false
			}
			None => {
				log::debug!("Nothing suitable for {}", iface);
				self.solution.selections.insert(iface.to_string(), Selection::Unresolved);
				false
			}
		}
	}
}
