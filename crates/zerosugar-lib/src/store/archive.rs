//! Unpacking downloaded archives.

use std::io::Read;

use super::StoreError;

pub const TAR_GZ: &str = "application/x-compressed-tar";
pub const TAR: &str = "application/x-tar";
pub const ZIP: &str = "application/zip";

/// Guesses the mime type of an archive from its URL.
pub fn guess_type(href: &str) -> Option<&'static str> {
	let href = href.to_lowercase();
	if href.ends_with(".tar.gz") || href.ends_with(".tgz") {
		Some(TAR_GZ)
	} else if href.ends_with(".tar") {
		Some(TAR)
	} else if href.ends_with(".zip") || href.ends_with(".xo") {
		Some(ZIP)
	} else {
		None
	}
}

/// Unpacks `data` of the given type into `destination`.
pub fn extract(data: &[u8], mime_type: &str, destination: &std::path::Path) -> Result<(), StoreError> {
	match mime_type {
		TAR_GZ => {
			let mut decompressed = Vec::new();
			flate2::read::GzDecoder::new(data).read_to_end(&mut decompressed)?;
			tar::Archive::new(decompressed.as_slice()).unpack(destination)?;
		},
		TAR => tar::Archive::new(data).unpack(destination)?,
		ZIP => zip::ZipArchive::new(std::io::Cursor::new(data))?.extract(destination)?,
		other => return Err(StoreError::UnsupportedArchive(other.to_string())),
	}
	Ok(())
}
