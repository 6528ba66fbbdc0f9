use serde::{Serialize, Deserialize};

use super::Version;

/// A generic enum to describe a range of versions.
/// 
/// Lower bounds are inclusive, upper bounds are exclusive.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub enum VersionBounds<T>
where T: std::cmp::PartialEq + std::cmp::Ord + std::clone::Clone,
{
	#[default] Any,
	Explicit(T),
	NotBefore(T),
	Before(T),
	Range(T, T),
}

impl<T> VersionBounds<T>
where T: std::cmp::PartialEq + std::cmp::Ord + std::clone::Clone,
{
	/// When all arguments are `None` will return `Any`
	pub fn new(explicit: Option<T>, not_before: Option<T>, before: Option<T>) -> crate::Result<VersionBounds<T>> {
		match (explicit, not_before, before) {
			(None, None, None) => Ok(VersionBounds::Any),
			(None, None, Some(before)) => Ok(VersionBounds::Before(before)),
			(None, Some(min), None) => Ok(VersionBounds::NotBefore(min)),
			(None, Some(min), Some(before)) => Ok(VersionBounds::Range(min, before)),
			(Some(e), None, None) => Ok(VersionBounds::Explicit(e)),
			_ => Err(crate::Error::Parse("Attempted to create bounds with both explicit and range version constraint".to_string()))
		}
	}

	pub fn is_version_within(&self, other: &T) -> bool {
		match self {
			VersionBounds::Any => true,
			VersionBounds::Explicit(v) => other == v,
			VersionBounds::NotBefore(min) => other >= min,
			VersionBounds::Before(before) => other < before,
			VersionBounds::Range(min, before) => min <= other && other < before,
		}
	}

	/// Gets the intersection between the bounds, if no intersection exists returns `None`
	pub fn inner_join(&self, other: &Self) -> Option<Self> {
		match (self.clone(), other.clone()) {
			(VersionBounds::Any, r) => Some(r),
			(l, VersionBounds::Any) => Some(l),

			(VersionBounds::Explicit(a), b) | (b, VersionBounds::Explicit(a)) => if b.is_version_within(&a) { Some(VersionBounds::Explicit(a)) } else { None },

			(VersionBounds::NotBefore(a), VersionBounds::NotBefore(b)) => Some(VersionBounds::NotBefore(std::cmp::max(a, b))),
			(VersionBounds::Before(a), VersionBounds::Before(b)) => Some(VersionBounds::Before(std::cmp::min(a, b))),

			(VersionBounds::NotBefore(a), VersionBounds::Before(b)) | (VersionBounds::Before(b), VersionBounds::NotBefore(a)) => {
				if a < b { Some(VersionBounds::Range(a, b)) } else { None }
			},

			(VersionBounds::NotBefore(a), VersionBounds::Range(b, c)) | (VersionBounds::Range(b, c), VersionBounds::NotBefore(a)) => {
				let min = std::cmp::max(a, b);
				if min < c { Some(VersionBounds::Range(min, c)) } else { None }
			},

			(VersionBounds::Before(a), VersionBounds::Range(b, c)) | (VersionBounds::Range(b, c), VersionBounds::Before(a)) => {
				let before = std::cmp::min(a, c);
				if b < before { Some(VersionBounds::Range(b, before)) } else { None }
			},

			(VersionBounds::Range(a, b), VersionBounds::Range(c, d)) => {
				let min = std::cmp::max(a, c);
				let before = std::cmp::min(b, d);
				if min < before { Some(VersionBounds::Range(min, before)) } else { None }
			},
		}
	}
}

impl VersionBounds<Version> {
	/// Parses a condition such as `>= 0.86 < 0.90` or `~0.88`.
	/// 
	/// `~X.Y` means any version from `X.Y` up to but excluding `X.(Y+1)`.
	/// An empty condition is `Any`.
	pub fn parse(condition: &str) -> crate::Result<Self> {
		let re = regex::Regex::new(r"(>=|<|~)\s*([0-9.]+)")
			.map_err(|e| crate::Error::Parse(e.to_string()))?;

		let mut bounds = VersionBounds::Any;
		let mut last_end = 0;
		for capture in re.captures_iter(condition) {
			let (Some(whole), Some(op), Some(version)) = (capture.get(0), capture.get(1), capture.get(2)) else { continue };
			if !condition[last_end..whole.start()].trim().is_empty() {
				break;
			}
			last_end = whole.end();

			let version_str = version.as_str();
			let next = match op.as_str() {
				">=" => VersionBounds::NotBefore(Version::new(version_str)?),
				"<" => VersionBounds::Before(Version::new(version_str)?),
				_ => {
					let mut parts: Vec<&str> = version_str.split('.').collect();
					let last = parts.pop().unwrap_or_default().parse::<u64>()
						.map_err(|e| crate::Error::Parse(format!("invalid version in '{}': {}", condition, e)))?;
					let bumped = (last + 1).to_string();
					parts.push(&bumped);
					VersionBounds::Range(Version::new(version_str)?, Version::new(&parts.join("."))?)
				}
			};

			bounds = bounds.inner_join(&next).ok_or_else(|| crate::Error::Parse(format!("condition '{}' can never be met", condition)))?;
		}

		if !condition[last_end..].trim().is_empty() {
			return Err(crate::Error::Parse(format!(
				"cannot parse restriction '{}', it should be in format \"(>=|<|~) <version>\"", condition
			)));
		}

		Ok(bounds)
	}
}

impl std::str::FromStr for VersionBounds<Version> {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

/// A predicate narrowing which implementations a dependency accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Restriction {
	Version(VersionBounds<Version>),
	/// Only implementations built for this machine, `None` meaning machine independent.
	Machine(Option<String>),
}

impl Restriction {
	pub fn meets(&self, implementation: &super::Implementation) -> bool {
		match self {
			Restriction::Version(bounds) => bounds.is_version_within(&implementation.version),
			Restriction::Machine(machine) => &implementation.machine == machine,
		}
	}
}

impl std::fmt::Display for Restriction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Restriction::Version(VersionBounds::Any) => write!(f, "any version"),
			Restriction::Version(VersionBounds::Explicit(v)) => write!(f, "version {}", v),
			Restriction::Version(VersionBounds::NotBefore(v)) => write!(f, "version >= {}", v),
			Restriction::Version(VersionBounds::Before(v)) => write!(f, "version < {}", v),
			Restriction::Version(VersionBounds::Range(a, b)) => write!(f, "version >= {} < {}", a, b),
			Restriction::Machine(Some(m)) => write!(f, "machine {}", m),
			Restriction::Machine(None) => write!(f, "machine independent"),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn v(s: &str) -> Version { Version::new(s).unwrap() }

	#[test] fn empty_condition_is_any() { assert_eq!(VersionBounds::parse("").unwrap(), VersionBounds::Any) }
	#[test] fn not_before_is_inclusive() { assert!(VersionBounds::parse(">= 1.0").unwrap().is_version_within(&v("1.0"))) }
	#[test] fn before_is_exclusive() { assert!(!VersionBounds::parse("< 2").unwrap().is_version_within(&v("2"))) }
	#[test] fn combined_condition() { assert_eq!(VersionBounds::parse(">=0.86 <0.90").unwrap(), VersionBounds::Range(v("0.86"), v("0.90"))) }
	#[test] fn tilde_bumps_last_part() { assert_eq!(VersionBounds::parse("~0.88").unwrap(), VersionBounds::Range(v("0.88"), v("0.89"))) }
	#[test] fn tilde_excludes_next_minor() { assert!(!VersionBounds::parse("~1.2").unwrap().is_version_within(&v("1.3"))) }
	#[test] fn garbage_is_rejected() { assert!(VersionBounds::parse("== 1.0").is_err()) }
	#[test] fn trailing_garbage_is_rejected() { assert!(VersionBounds::parse(">= 1.0 foo").is_err()) }
	#[test] fn impossible_condition_is_rejected() { assert!(VersionBounds::parse(">= 2 < 1").is_err()) }
	#[test] fn join_keeps_tighter_min() { assert_eq!(VersionBounds::NotBefore(1).inner_join(&VersionBounds::NotBefore(3)), Some(VersionBounds::NotBefore(3))) }
	#[test] fn join_of_disjoint_ranges_is_none() { assert_eq!(VersionBounds::Range(1, 3).inner_join(&VersionBounds::Range(3, 5)), None) }
	#[test] fn join_explicit_outside_is_none() { assert_eq!(VersionBounds::Explicit(5).inner_join(&VersionBounds::Before(5)), None) }
}
