//! Which candidates the solver tries first, and why some can't be used at all.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::model::*;
use crate::model::arch::{machine_group, SOURCE_MACHINE};
use crate::NetworkUse;

/// Why an implementation was not selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
	/// Another selection locked the solve to a different machine group.
	MachineGroup,
	/// A restriction on the dependency is not met.
	Restriction,
	/// Stability is buggy or worse.
	Stability(Stability),
	Offline,
	UnsupportedOs,
	SourceCode,
	UnsupportedMachine,
	/// Usable itself, but its own dependencies could not be satisfied.
	IncompatibleDependencies,
	/// A better candidate won before this one was tried.
	NotProcessed,
}

impl std::fmt::Display for Rejection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Rejection::MachineGroup => write!(f, "Incompatible with another selection from a different architecture group"),
			Rejection::Restriction => write!(f, "Incompatible with another selected implementation"),
			Rejection::Stability(s) => write!(f, "{}", s),
			Rejection::Offline => write!(f, "Not cached and we are off-line"),
			Rejection::UnsupportedOs => write!(f, "Unsupported OS"),
			Rejection::SourceCode => write!(f, "Source code"),
			Rejection::UnsupportedMachine => write!(f, "Unsupported machine type"),
			Rejection::IncompatibleDependencies => write!(f, "Incompatible with dependency restrictions"),
			Rejection::NotProcessed => write!(f, "Not processed"),
		}
	}
}

/// An implementation under consideration, with its cache state looked up once.
#[derive(Debug, Clone)]
pub struct Candidate {
	pub implementation: Arc<Implementation>,
	pub cached: bool,
}

/// Everything ordering depends on at one point of a solve.
#[derive(Debug, Clone)]
pub struct CandidateOrder {
	pub network_use: NetworkUse,
	pub help_with_testing: bool,
	/// Machine group the solve is locked to, if any.
	pub machine_group: Option<u32>,
	/// Stability policy of the interface being resolved.
	pub stability_policy: Option<Stability>,
}

fn compare_ranks(a: Option<usize>, b: Option<usize>) -> Ordering {
	match (a, b) {
		(Some(a), Some(b)) => a.cmp(&b),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal,
	}
}

impl CandidateOrder {
	/// The first reason `candidate` can't be used, `None` when it can.
	/// 
	/// Checked in order: machine group, restrictions, stability, off-line cache, OS then machine.
	pub fn unusable_reason(&self, candidate: &Candidate, restrictions: &[Restriction], arch: &Architecture) -> Option<Rejection> {
		let implementation = &candidate.implementation;
		let machine = implementation.machine.as_deref();

		if let (Some(machine), Some(group)) = (machine, self.machine_group) {
			if machine_group(Some(machine)) != group {
				return Some(Rejection::MachineGroup);
			}
		}
		if restrictions.iter().any(|r| !r.meets(implementation)) {
			return Some(Rejection::Restriction);
		}
		let stability = implementation.stability();
		if stability <= Stability::Buggy {
			return Some(Rejection::Stability(stability));
		}
		if self.network_use == NetworkUse::Offline && !candidate.cached {
			return Some(Rejection::Offline);
		}
		if arch.os_rank(&implementation.os).is_none() {
			return Some(Rejection::UnsupportedOs);
		}
		if arch.machine_rank(&implementation.machine).is_none() {
			return Some(if machine == Some(SOURCE_MACHINE) { Rejection::SourceCode } else { Rejection::UnsupportedMachine });
		}
		None
	}

	/// Stability for comparing, anything at or above the policy counts as preferred.
	fn effective_stability(&self, stability: Stability) -> Stability {
		let policy = self.stability_policy.unwrap_or(if self.help_with_testing { Stability::Testing } else { Stability::Stable });
		if stability >= policy { Stability::Preferred } else { stability }
	}

	/// `Less` when `a` should be tried before `b`.
	pub fn compare(&self, a: &Candidate, b: &Candidate, restrictions: &[Restriction], arch: &Architecture) -> Ordering {
		let (ai, bi) = (&a.implementation, &b.implementation);
		let native = arch.native_group();

		let a_unusable = self.unusable_reason(a, restrictions, arch).is_some();
		let b_unusable = self.unusable_reason(b, restrictions, arch).is_some();

		a_unusable.cmp(&b_unusable)
			.then_with(|| {
				let a_native = machine_group(ai.machine.as_deref()) == native;
				let b_native = machine_group(bi.machine.as_deref()) == native;
				b_native.cmp(&a_native)
			})
			.then_with(|| (bi.stability() == Stability::Preferred).cmp(&(ai.stability() == Stability::Preferred)))
			.then_with(|| if self.network_use != NetworkUse::Full { b.cached.cmp(&a.cached) } else { Ordering::Equal })
			.then_with(|| self.effective_stability(bi.stability()).cmp(&self.effective_stability(ai.stability())))
			.then_with(|| bi.version.cmp(&ai.version))
			.then_with(|| compare_ranks(arch.os_rank(&ai.os), arch.os_rank(&bi.os)))
			.then_with(|| compare_ranks(arch.machine_rank(&ai.machine), arch.machine_rank(&bi.machine)))
			.then_with(|| if self.network_use == NetworkUse::Full { b.cached.cmp(&a.cached) } else { Ordering::Equal })
			.then_with(|| ai.id.cmp(&bi.id))
	}
}
