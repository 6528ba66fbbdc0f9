//! Digests of implementation directories.
//! 
//! A manifest lists every directory, file and symlink below the root in a stable order:
//! - `D /path` for directories.
//! - `F <sha256> <size> <path>` for files, `X` instead of `F` when executable.
//! - `S <sha256 of target> <target length> <path>` for symlinks.
//! 
//! The implementation id is `sha256=` followed by the hash of the manifest text.

/// Name of the manifest kept in every stored implementation, it is not part of the manifest itself.
pub const MANIFEST_FILE: &str = ".manifest";

pub const ALGORITHM: &str = "sha256";

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
	use std::os::unix::fs::PermissionsExt;
	metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
	false
}

/// Builds the manifest text for `root`.
pub fn generate(root: &std::path::Path) -> Result<String, super::StoreError> {
	let mut manifest = String::new();

	for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
		let entry = entry?;
		let relative = entry.path().strip_prefix(root)
			.map_err(|_| super::StoreError::Validation(format!("{} escaped the store", entry.path().display())))?
			.to_string_lossy()
			.replace('\\', "/");
		if relative == MANIFEST_FILE {
			continue;
		}

		let file_type = entry.file_type();
		if file_type.is_dir() {
			manifest.push_str(&format!("D /{}\n", relative));
		} else if file_type.is_symlink() {
			let target = std::fs::read_link(entry.path())?.to_string_lossy().to_string();
			manifest.push_str(&format!("S {} {} {}\n", sha256::digest(target.as_bytes()), target.len(), relative));
		} else {
			let content = std::fs::read(entry.path())?;
			let kind = if is_executable(&entry.metadata()?) { "X" } else { "F" };
			manifest.push_str(&format!("{} {} {} {}\n", kind, sha256::digest(content.as_slice()), content.len(), relative));
		}
	}

	Ok(manifest)
}

/// Digest of a manifest in the `alg=value` form of implementation ids.
pub fn digest_of(manifest: &str) -> String {
	format!("{}={}", ALGORITHM, sha256::digest(manifest.as_bytes()))
}

/// Computes the implementation id `root` would have in the store.
pub fn digest_directory(root: &std::path::Path) -> Result<String, super::StoreError> {
	Ok(digest_of(&generate(root)?))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn manifest_lists_directories_and_files() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir(dir.path().join("bin")).unwrap();
		std::fs::write(dir.path().join("bin/tool"), b"hello").unwrap();
		let manifest = generate(dir.path()).unwrap();
		assert_eq!(manifest, format!("D /bin\nF {} 5 bin/tool\n", sha256::digest(b"hello".as_slice())));
	}

	#[test]
	fn manifest_file_is_ignored() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("a"), b"x").unwrap();
		let before = digest_directory(dir.path()).unwrap();
		std::fs::write(dir.path().join(MANIFEST_FILE), b"anything").unwrap();
		assert_eq!(before, digest_directory(dir.path()).unwrap());
	}

	#[test]
	fn content_changes_digest() {
		let a = tempfile::tempdir().unwrap();
		let b = tempfile::tempdir().unwrap();
		std::fs::write(a.path().join("f"), b"1").unwrap();
		std::fs::write(b.path().join("f"), b"2").unwrap();
		assert_ne!(digest_directory(a.path()).unwrap(), digest_directory(b.path()).unwrap());
	}
}
