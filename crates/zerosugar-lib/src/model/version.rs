use serde::*;

/// Value of each modifier, everything without a modifier sits at zero.
fn modifier_value(modifier: &str) -> Option<i8> {
	match modifier {
		"pre" => Some(-2),
		"rc" => Some(-1),
		"" => Some(0),
		"post" => Some(1),
		_ => None,
	}
}

fn modifier_name(value: i8) -> &'static str {
	match value {
		-2 => "pre",
		-1 => "rc",
		1 => "post",
		_ => "",
	}
}

/// An implementation version such as `1.2`, `1.2-pre3` or `2.0-rc1-post`.
/// 
/// A version is a list of dotted numbers, each followed by a modifier.
/// Versions compare part by part, so `1.2-pre3 < 1.2-rc1 < 1.2 < 1.2-post`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
	parts: Vec<(Vec<u64>, i8)>,
}

impl Version {
	pub fn new(version: &str) -> crate::Result<Self> {
		if version.is_empty() {
			return Err(crate::Error::Parse("empty version string".to_string()));
		}

		let mut parts = Vec::new();
		let mut segments = version.split('-');
		/* The first segment never has a modifier, later ones start with one */
		let mut numbers = segments.next().unwrap_or_default();
		loop {
			let dotted = if numbers.is_empty() {
				Vec::new()
			} else {
				numbers.split('.')
					.map(|n| n.parse::<u64>())
					.collect::<Result<Vec<_>, _>>()
					.map_err(|e| crate::Error::Parse(format!("invalid version format in '{}': {}", version, e)))?
			};

			match segments.next() {
				Some(segment) => {
					let split = segment.find(|c: char| !c.is_ascii_lowercase()).unwrap_or(segment.len());
					let (modifier, rest) = segment.split_at(split);
					let value = modifier_value(modifier)
						.ok_or_else(|| crate::Error::Parse(format!("invalid version modifier in '{}': {}", version, modifier)))?;
					parts.push((dotted, value));
					numbers = rest;
				},
				None => {
					/* A trailing modifier already closed the last part */
					if !(dotted.is_empty() && !parts.is_empty()) {
						parts.push((dotted, 0));
					}
					break;
				}
			}
		}

		Ok(Version { parts })
	}
}

impl TryFrom<String> for Version {
	type Error = crate::Error;
	fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(&value) }
}

impl std::str::FromStr for Version {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
}

impl From<Version> for String {
	fn from(value: Version) -> Self { value.to_string() }
}

impl std::fmt::Display for Version {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut out = String::new();
		for (i, (numbers, modifier)) in self.parts.iter().enumerate() {
			let dotted = numbers.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(".");
			out.push_str(&dotted);
			/* The modifier of the last plain part is implied */
			if i + 1 < self.parts.len() || *modifier != 0 {
				out.push('-');
				out.push_str(modifier_name(*modifier));
			}
		}
		write!(f, "{}", out)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn v(s: &str) -> Version { Version::new(s).unwrap() }

	#[test] fn versions_are_not_compared_lexically() { assert!(v("1.10") > v("1.9")) }
	#[test] fn longer_versions_are_greater() { assert!(v("1.2.1") > v("1.2")) }
	#[test] fn pre_release_is_older() { assert!(v("1.2-pre3") < v("1.2")) }
	#[test] fn pre_before_rc() { assert!(v("1.2-pre3") < v("1.2-rc1")) }
	#[test] fn rc_before_release() { assert!(v("1.2-rc1") < v("1.2")) }
	#[test] fn post_release_is_newer() { assert!(v("1.2-post") > v("1.2")) }
	#[test] fn post_numbers_compare() { assert!(v("1.2-post1") < v("1.2-post2")) }
	#[test] fn trailing_dash_is_plain() { assert_eq!(v("1.2-"), v("1.2")) }
	#[test] fn display_keeps_modifiers() { assert_eq!(v("1.2-pre3").to_string(), "1.2-pre3") }
	#[test] fn display_plain() { assert_eq!(v("0.4").to_string(), "0.4") }
	#[test] fn display_trailing_modifier() { assert_eq!(v("1.0-post").to_string(), "1.0-post") }
	#[test] fn empty_is_an_error() { assert!(Version::new("").is_err()) }
	#[test] fn letters_are_an_error() { assert!(Version::new("1.x").is_err()) }
	#[test] fn unknown_modifier_is_an_error() { assert!(Version::new("1.0-beta").is_err()) }
}
