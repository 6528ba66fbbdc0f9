//! Operating system and CPU compatibility tables.
//! 
//! Ranks map a name to how good it is, lower is better. A name missing from the table can't run at all.
//! `None` stands for implementations that work on any OS or machine.

use std::collections::{HashMap, HashSet};

/// Machine type of implementations that are source code.
pub const SOURCE_MACHINE: &str = "src";

/// Every chosen machine specific implementation must come from the same group.
/// 
/// This is about binaries, so `x86_64` is not compatible with `i686`.
pub fn machine_group(machine: Option<&str>) -> u32 {
	match machine {
		Some("x86_64") | Some("ppc64") => 64,
		_ => 0,
	}
}

pub fn canonicalize_machine(machine: &str) -> String {
	let machine = machine.to_lowercase();
	match machine.as_str() {
		"x86-64" | "amd64" => "x86_64".to_string(),
		"i86pc" | "x86" => "i686".to_string(),
		"arm64" => "aarch64".to_string(),
		_ => machine,
	}
}

pub fn canonicalize_os(os: &str) -> String {
	match os {
		"linux" => "Linux".to_string(),
		"macos" => "MacOSX".to_string(),
		"windows" => "Windows".to_string(),
		"freebsd" => "FreeBSD".to_string(),
		"netbsd" => "NetBSD".to_string(),
		"openbsd" => "OpenBSD".to_string(),
		"solaris" => "SunOS".to_string(),
		_ => os.to_string(),
	}
}

fn os_ranks(target_os: Option<&str>) -> HashMap<Option<String>, usize> {
	let mut ranks = HashMap::new();
	let mut push = |name: Option<&str>| {
		let rank = ranks.len();
		ranks.entry(name.map(str::to_string)).or_insert(rank);
	};

	/* Binaries compiled for this OS are best */
	push(target_os);
	/* Everything supports POSIX except Windows, Cygwin does */
	if target_os != Some("Windows") {
		push(Some("POSIX"));
	}
	match target_os {
		Some("Cygwin") => push(Some("Windows")),
		Some("MacOSX") => push(Some("Darwin")),
		_ => {},
	}
	push(None);
	ranks
}

fn machine_ranks(target_machine: Option<&str>) -> HashMap<Option<String>, usize> {
	let mut ranks = HashMap::new();
	let mut push = |name: Option<&str>| {
		let rank = ranks.len();
		ranks.entry(name.map(str::to_string)).or_insert(rank);
	};

	push(target_machine);
	/* Older processors this one can still run, earlier ones preferred */
	let older: &[&str] = match target_machine {
		Some("i486") => &["i386"],
		Some("i586") => &["i486", "i386"],
		Some("i686") => &["i586", "i486", "i386"],
		Some("x86_64") => &["i686", "i586", "i486", "i386"],
		Some("ppc") => &["ppc32"],
		Some("ppc64") => &["ppc"],
		_ => &[],
	};
	for machine in older {
		push(Some(machine));
	}
	push(None);
	ranks
}

/// Describes what an implementation must run on for the solver to consider it.
#[derive(Debug, Clone, PartialEq)]
pub struct Architecture {
	/// The binary OS this architecture targets.
	pub os: Option<String>,
	/// The binary machine this architecture targets, decides the native machine group.
	pub machine: Option<String>,
	pub os_ranks: HashMap<Option<String>, usize>,
	pub machine_ranks: HashMap<Option<String>, usize>,
	/// Values of a dependency's `use` that apply, other dependencies are ignored.
	pub uses: HashSet<Option<String>>,
	/// Architecture of dependencies, `None` when it is this architecture.
	child: Option<Box<Architecture>>,
}

impl Architecture {
	pub fn for_target(os: Option<&str>, machine: Option<&str>) -> Self {
		let os = os.map(canonicalize_os);
		let machine = machine.map(canonicalize_machine);
		Self {
			os_ranks: os_ranks(os.as_deref()),
			machine_ranks: machine_ranks(machine.as_deref()),
			os,
			machine,
			uses: HashSet::from([None]),
			child: None,
		}
	}

	/// The architecture of the running system.
	pub fn host() -> Self {
		Self::for_target(Some(std::env::consts::OS), Some(std::env::consts::ARCH))
	}

	/// Matches source code that builds binaries for `binary`.
	/// 
	/// Source code depends on binary tools, not other source packages, so the child is the binary architecture.
	pub fn source(binary: Architecture) -> Self {
		Self {
			os: binary.os.clone(),
			machine: binary.machine.clone(),
			os_ranks: binary.os_ranks.clone(),
			machine_ranks: HashMap::from([(Some(SOURCE_MACHINE.to_string()), 0)]),
			uses: binary.uses.clone(),
			child: Some(Box::new(binary)),
		}
	}

	pub fn child_arch(&self) -> &Architecture {
		self.child.as_deref().unwrap_or(self)
	}

	pub fn is_source(&self) -> bool {
		self.machine_ranks.contains_key(&Some(SOURCE_MACHINE.to_string()))
	}

	/// Group of the machine this architecture targets.
	pub fn native_group(&self) -> u32 {
		machine_group(self.machine.as_deref())
	}

	pub fn os_rank(&self, os: &Option<String>) -> Option<usize> {
		self.os_ranks.get(os).copied()
	}

	pub fn machine_rank(&self, machine: &Option<String>) -> Option<usize> {
		self.machine_ranks.get(machine).copied()
	}
}
