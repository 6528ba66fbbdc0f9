//! Byte counts of the downloads in one stage, for progress reporting.

use std::sync::{Arc, Mutex, MutexGuard};

/// Size assumed for downloads that don't declare one.
pub const GUESSED_SIZE: u64 = 4096;

#[derive(Debug, Default)]
struct Entry {
	expected: Option<u64>,
	so_far: u64,
	finished: bool,
}

#[derive(Debug, Default)]
struct MonitorState {
	/// Bytes of downloads that are over, successful or not.
	completed: u64,
	entries: Vec<Entry>,
	/// Highest fraction reported so far.
	reported: f64,
}

/// Tracks a set of downloads. Cloning gives another handle to the same set.
#[derive(Debug, Default, Clone)]
pub struct DownloadMonitor {
	state: Arc<Mutex<MonitorState>>,
}

/// Progress of one download registered with a [`DownloadMonitor`].
#[derive(Debug, Clone)]
pub struct DownloadProgress {
	monitor: DownloadMonitor,
	index: usize,
}

impl DownloadMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> MutexGuard<'_, MonitorState> {
		self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	/// Registers a download. Registering everything up front keeps the fraction from going backwards.
	pub fn start(&self, url: &str, expected: Option<u64>) -> DownloadProgress {
		let mut state = self.state();
		log::trace!("Track download of {}", url);
		state.entries.push(Entry { expected, ..Default::default() });
		DownloadProgress { monitor: self.clone(), index: state.entries.len() - 1 }
	}

	/// Downloaded bytes over expected bytes, zero when nothing is registered.
	/// 
	/// Never lower than a previous answer, sizes learnt late only slow it down.
	/// It is 1.0 once every download is over.
	pub fn fraction(&self) -> f64 {
		let mut state = self.state();
		if state.entries.is_empty() {
			return 0.0;
		}
		if state.entries.iter().all(|e| e.finished) {
			state.reported = 1.0;
			return 1.0;
		}

		let mut done = state.completed;
		let mut total = state.completed;
		for entry in state.entries.iter().filter(|e| !e.finished) {
			done += entry.so_far;
			/* A running download is never complete */
			total += std::cmp::max(entry.expected.unwrap_or(GUESSED_SIZE), entry.so_far + 1);
		}
		let computed = if total == 0 { 0.0 } else { done as f64 / total as f64 };

		state.reported = state.reported.max(computed);
		state.reported
	}
}

impl DownloadProgress {
	/// Sets the size announced by the server, unless the feed declared one.
	pub fn set_expected(&self, expected: Option<u64>) {
		let mut state = self.monitor.state();
		if let Some(entry) = state.entries.get_mut(self.index) {
			if entry.expected.is_none() {
				entry.expected = expected;
			}
		}
	}

	pub fn advance(&self, bytes: u64) {
		let mut state = self.monitor.state();
		if let Some(entry) = state.entries.get_mut(self.index) {
			entry.so_far += bytes;
		}
	}

	/// Marks the download as over, its bytes now count as completed.
	pub fn finish(&self) {
		let mut state = self.monitor.state();
		let so_far = match state.entries.get_mut(self.index) {
			Some(entry) if !entry.finished => {
				entry.finished = true;
				entry.so_far
			},
			_ => return,
		};
		state.completed += so_far;
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test] fn empty_monitor_is_zero() { assert_eq!(DownloadMonitor::new().fraction(), 0.0) }

	#[test]
	fn unknown_sizes_are_guessed() {
		let monitor = DownloadMonitor::new();
		let p = monitor.start("a", None);
		p.advance(1024);
		assert_eq!(monitor.fraction(), 0.25);
	}

	#[test]
	fn fraction_never_goes_backwards() {
		let monitor = DownloadMonitor::new();
		let a = monitor.start("a", Some(1000));
		let b = monitor.start("b", None);
		let c = monitor.start("c", Some(10));

		let mut last = monitor.fraction();
		let mut check = || {
			let f = monitor.fraction();
			assert!(f >= last, "{} < {}", f, last);
			last = f;
		};

		a.advance(500); check();
		a.advance(600); check();
		a.finish(); check();
		b.set_expected(Some(100_000)); check();
		b.advance(3000); check();
		b.advance(3000); check();
		b.finish(); check();
		c.set_expected(Some(20)); check();
		c.advance(5); check();
		c.finish(); check();
		assert_eq!(monitor.fraction(), 1.0);
	}

	#[test]
	fn late_sizes_dont_lower_the_fraction() {
		let monitor = DownloadMonitor::new();
		let a = monitor.start("a", Some(100));
		let b = monitor.start("b", None);
		a.advance(100);
		a.finish();
		let before = monitor.fraction();
		assert!(before > 0.0);

		b.set_expected(Some(1_000_000));
		assert!(monitor.fraction() >= before);
		b.advance(1_000_000);
		assert!(monitor.fraction() < 1.0);
		b.finish();
		assert_eq!(monitor.fraction(), 1.0);
	}

	#[test]
	fn empty_downloads_end_at_one() {
		let monitor = DownloadMonitor::new();
		let a = monitor.start("a", Some(0));
		assert!(monitor.fraction() < 1.0);
		a.finish();
		assert_eq!(monitor.fraction(), 1.0);
	}
}
