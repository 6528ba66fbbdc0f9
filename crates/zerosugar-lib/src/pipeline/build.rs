//! Running the compile tool.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::Reporter;

async fn forward<R: AsyncRead + Unpin>(reader: Option<R>, reporter: &Reporter) {
	let Some(reader) = reader else { return };
	let mut lines = BufReader::new(reader).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => reporter.verbose(line.trim_end()),
			Ok(None) => break,
			Err(e) => {
				log::warn!("Failed to read build output: {}", e);
				break;
			}
		}
	}
}

/// Runs `<main> autocompile <iface>` with `environ`, every line it prints is reported.
/// 
/// The child is waited for even if the future is dropped.
pub async fn autocompile(main: &std::path::Path, iface: &str, environ: HashMap<String, String>, reporter: &Reporter)
-> crate::Result<std::process::ExitStatus> {
	log::info!("Running {} autocompile {}", main.display(), iface);
	let mut child = tokio::process::Command::new(main)
		.arg("autocompile")
		.arg(iface)
		.env_clear()
		.envs(environ)
		.stdin(std::process::Stdio::null())
		.stdout(std::process::Stdio::piped())
		.stderr(std::process::Stdio::piped())
		.kill_on_drop(false)
		.spawn()
		.map_err(|e| crate::Error::Build(format!("failed to run {}: {}", main.display(), e)))?;

	tokio::join!(
		forward(child.stdout.take(), reporter),
		forward(child.stderr.take(), reporter),
	);
	let status = child.wait().await?;
	log::info!("Build of {} finished with {}", iface, status);
	Ok(status)
}
