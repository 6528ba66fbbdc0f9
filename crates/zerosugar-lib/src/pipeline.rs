//! Pulls interfaces: solves, downloads and builds until they can run.
//! 
//! Work is split into [`Link`] stages kept on a stack, the last one pushed runs first.
//! One stage at a time waits for its work. A user interface follows along through
//! [`PipelineEvent`]s and steers through a [`PipelineHandle`].

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::fetch::DownloadMonitor;
use crate::model::{canonical_iface_uri, display_name, is_local_uri};
use crate::trust::{ConfirmRequest, KeyConfirmer, KeyInfo};
use crate::{NetworkUse, Policy, Session};

pub mod link;
pub use link::{Detach, Link, StageEvent};

pub mod build;

/// How often progress is reported while a stage waits.
const SYNC_DELAY: std::time::Duration = std::time::Duration::from_millis(200);

/// What a pipeline tells its user interface.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
	/// Fraction done, `None` when it can't be measured.
	Progress(Option<f64>),
	Finished,
	Cancelled,
	/// A key needs the user's decision, answer with [`PipelineHandle::accept`] or [`PipelineHandle::deny`].
	KeyConfirm(KeyInfo),
	Verbose(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
	Finished,
	Cancelled,
}

#[derive(Debug)]
enum Command {
	Cancel,
	Accept(KeyInfo),
	Deny,
}

/// Steers a running pipeline from elsewhere.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
	commands: mpsc::UnboundedSender<Command>,
}

impl PipelineHandle {
	fn send(&self, command: Command) {
		if self.commands.send(command).is_err() {
			log::warn!("Pipeline is gone");
		}
	}

	/// Stops the pull, a build that is running is waited for.
	pub fn cancel(&self) {
		self.send(Command::Cancel)
	}

	/// Trusts a key sent with [`PipelineEvent::KeyConfirm`].
	pub fn accept(&self, key: KeyInfo) {
		self.send(Command::Accept(key))
	}

	/// Refuses the keys being confirmed, which cancels the pull.
	pub fn deny(&self) {
		self.send(Command::Deny)
	}
}

/// Sends verbose lines and other events to the user interface, and logs them.
#[derive(Debug, Clone)]
pub struct Reporter {
	events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl Reporter {
	/// A reporter that only logs.
	pub fn detached() -> Self {
		Self { events: None }
	}

	fn emit(&self, event: PipelineEvent) {
		if let Some(events) = &self.events {
			if events.send(event).is_err() {
				log::trace!("Nobody listens to pipeline events");
			}
		}
	}

	pub fn verbose(&self, message: impl Into<String>) {
		let message = message.into();
		log::info!("{}", message);
		self.emit(PipelineEvent::Verbose(message));
	}
}

/// Keys of one feed still waiting for the user.
#[derive(Debug)]
struct Confirming {
	keys: VecDeque<KeyInfo>,
	reply: oneshot::Sender<()>,
}

pub struct Pipeline {
	session: Arc<Session>,
	queue: Vec<Link>,
	/// Policy of the first interface of the last pull.
	root: Option<Policy>,
	reporter: Reporter,
	confirmer: KeyConfirmer,
	commands: mpsc::UnboundedReceiver<Command>,
	confirm_requests: mpsc::UnboundedReceiver<ConfirmRequest>,
	confirming: Option<Confirming>,
	stat_all: usize,
	stat_processed: usize,
	progressed: bool,
	cancelled_by_intention: bool,
}

impl std::fmt::Debug for Pipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Pipeline")
			.field("queue", &self.queue.iter().map(Link::to_string).collect::<Vec<_>>())
			.field("processed", &self.stat_processed)
			.field("skipped", &self.skipped())
			.finish()
	}
}

/// What waiting on a stage came to.
enum Waited {
	Done(StageEvent),
	Cancelled,
}

impl Pipeline {
	/// # Returns
	/// The pipeline, a handle to steer it and the events it sends.
	pub fn new(session: Arc<Session>) -> (Self, PipelineHandle, mpsc::UnboundedReceiver<PipelineEvent>) {
		let (commands_tx, commands) = mpsc::unbounded_channel();
		let (events_tx, events) = mpsc::unbounded_channel();
		let (confirmer, confirm_requests) = KeyConfirmer::new();
		let pipeline = Self {
			session,
			queue: Vec::new(),
			root: None,
			reporter: Reporter { events: Some(events_tx) },
			confirmer,
			commands,
			confirm_requests,
			confirming: None,
			stat_all: 0,
			stat_processed: 0,
			progressed: false,
			cancelled_by_intention: false,
		};
		(pipeline, PipelineHandle { commands: commands_tx }, events)
	}

	pub fn session(&self) -> &Arc<Session> {
		&self.session
	}

	/// Interfaces of the last pull that had to be worked on.
	pub fn processed(&self) -> usize {
		self.stat_processed
	}

	/// Interfaces of the last pull that were fine already.
	pub fn skipped(&self) -> usize {
		self.stat_all - self.stat_processed
	}

	/// Whether the last pull was cancelled by the user rather than by a failure.
	pub fn cancelled_by_intention(&self) -> bool {
		self.cancelled_by_intention
	}

	/// Policy of the first interface of the last pull, with its latest solution.
	pub fn policy(&self) -> Option<&Policy> {
		self.root.as_ref()
	}

	pub fn policy_mut(&mut self) -> Option<&mut Policy> {
		self.root.as_mut()
	}

	/// Whether a feed of the first interface of the last pull needs checking for updates.
	pub fn is_stale(&mut self) -> bool {
		let session = self.session.clone();
		self.root.as_mut().is_some_and(|policy| policy.any_stale(&session))
	}

	/// Makes `feeds` ready to run, fetching and building what is missing.
	/// 
	/// Interfaces that are ready already are skipped unless `force` is set.
	pub async fn pull(&mut self, feeds: &[impl AsRef<str>], network_use: Option<NetworkUse>, force: bool) -> PullOutcome {
		self.start(feeds, |session, uri| {
			let mut policy = Policy::new(uri, &session.config);
			if let Some(network_use) = network_use {
				policy.set_network_use(network_use);
			}
			let needed = policy.need_download(session);
			let link = Link::solve(policy, force);
			Ok((link, force || needed))
		}).await
	}

	/// Checks every feed of `feeds` for updates.
	/// 
	/// # Parameters
	/// - `freshness` - Overrides the configured freshness, in seconds.
	pub async fn refresh(&mut self, feeds: &[impl AsRef<str>], freshness: Option<u64>) -> PullOutcome {
		self.start(feeds, |session, uri| {
			let mut policy = Policy::new(uri, &session.config);
			if let Some(freshness) = freshness.filter(|f| *f > 0) {
				policy.set_freshness(freshness);
			}
			Ok((Link::refresh(policy), true))
		}).await
	}

	async fn start<F>(&mut self, feeds: &[impl AsRef<str>], link_new: F) -> PullOutcome
	where F: Fn(&Session, &str) -> crate::Result<(Link, bool)> {
		while self.commands.try_recv().is_ok() {}
		self.queue.clear();
		self.root = None;
		self.cancelled_by_intention = false;

		let names: Vec<String> = feeds.iter().map(|f| display_name(f.as_ref())).collect();
		self.reporter.verbose(format!("Pull {}.", names.join(", ")));

		self.stat_all = feeds.len();
		self.stat_processed = 0;

		let session = self.session.clone();
		for feed in feeds {
			let created = canonical_iface_uri(feed.as_ref()).and_then(|uri| {
				if is_local_uri(&uri) {
					/* A broken local feed can't be fixed by downloading */
					session.catalog.get_feed(&uri)?;
				}
				link_new(&session, &uri)
			});
			let (link, enqueue) = match created {
				Ok(created) => created,
				Err(e) => {
					log::error!("Failed to pull {} into queue: {}", feed.as_ref(), e);
					self.reporter.verbose(e.to_string());
					return self.cancel();
				}
			};

			if self.root.is_none() {
				self.root = Some(link.policy().clone());
			}
			if enqueue {
				self.queue.push(link);
				self.stat_processed += 1;
			}
		}

		if self.queue.is_empty() {
			return self.finish();
		}
		self.run().await
	}

	async fn run(&mut self) -> PullOutcome {
		let session = self.session.clone();
		let reporter = self.reporter.clone();
		let confirmer = self.confirmer.clone();

		while let Some(mut link) = self.queue.pop() {
			if self.poll_cancel() {
				return self.cancel();
			}
			log::debug!("Switch to {}", link);

			let probe = link.progress_probe();
			let interruptible = link.interruptible();
			let event = {
				let attached = match link.attach(&session, &reporter, &confirmer) {
					Ok(attached) => attached,
					Err(e) => {
						log::error!("Failed to start stage: {}", e);
						reporter.verbose(e.to_string());
						return self.cancel();
					},
				};
				match attached {
					Some(attached) => match self.wait(attached, probe, interruptible).await {
						Waited::Done(event) => Some(event),
						Waited::Cancelled => return self.cancel(),
					},
					None => None,
				}
			};
			let event = match event {
				Some(event) => event,
				None if link.policy().ready() => {
					reporter.verbose("* ready to use;");
					StageEvent::Skipped
				},
				None => {
					reporter.verbose("* failed;");
					return self.cancel();
				},
			};

			let name = link.to_string();
			let root = self.root.as_ref().map(|p| p.root().to_string());
			if root.as_deref() == Some(link.policy().root()) && !link.policy().src() {
				self.root = Some(link.policy().clone());
			}

			match link.detach(event, &session, &reporter) {
				Detach::Unrecoverable => {
					log::info!("{} can't recover", name);
					return self.cancel();
				},
				Detach::Next(next) => {
					if !next.is_empty() {
						let names: Vec<String> = next.iter().rev().map(Link::to_string).collect();
						log::debug!("{} attached {:?}", name, names);
					}
					self.queue.extend(next);
				},
			}
		}
		self.finish()
	}

	/// Waits for the attached work while handling commands, key confirmations and progress.
	async fn wait(&mut self, attached: link::Attached<'_>, probe: Option<DownloadMonitor>, interruptible: bool) -> Waited {
		let mut attached = attached;
		let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + SYNC_DELAY, SYNC_DELAY);
		let mut cancelled = false;
		loop {
			tokio::select! {
				biased;
				Some(command) = self.commands.recv() => {
					if self.handle_command(command) {
						if interruptible {
							return Waited::Cancelled;
						}
						log::info!("Waiting for the build to finish before cancelling");
						cancelled = true;
					}
				},
				Some(request) = self.confirm_requests.recv() => self.start_confirming(request),
				_ = ticker.tick() => {
					if self.confirming.is_none() {
						self.reporter.emit(PipelineEvent::Progress(probe.as_ref().map(DownloadMonitor::fraction)));
						self.progressed = true;
					}
				},
				event = &mut attached => {
					return if cancelled { Waited::Cancelled } else { Waited::Done(event) };
				},
			}
		}
	}

	/// Handles a command, `true` when the pull should be cancelled.
	fn handle_command(&mut self, command: Command) -> bool {
		match command {
			Command::Cancel => {
				self.cancelled_by_intention = true;
				true
			},
			Command::Accept(key) => {
				if self.confirming.is_none() {
					log::warn!("Key {} was accepted without being asked for", key.fingerprint);
					return false;
				}
				self.reporter.verbose(format!("* trusting {} for {};", key.fingerprint, key.domain));
				if let Err(e) = self.session.trust.trust_key(&key.fingerprint, &key.domain) {
					log::error!("Failed to trust {}: {}", key.fingerprint, e);
				}
				self.confirm_next();
				false
			},
			Command::Deny => {
				if self.confirming.is_none() {
					log::warn!("Keys were denied without being asked for");
				}
				self.reporter.verbose("* key confirm was denied;");
				self.stop_confirming();
				self.cancelled_by_intention = true;
				true
			},
		}
	}

	/// Takes any cancel sent while no stage was waiting.
	fn poll_cancel(&mut self) -> bool {
		let mut cancel = false;
		while let Ok(command) = self.commands.try_recv() {
			cancel |= self.handle_command(command);
		}
		cancel
	}

	fn start_confirming(&mut self, request: ConfirmRequest) {
		log::debug!("{} keys to confirm for {}", request.keys.len(), request.feed);
		self.stop_confirming();
		self.confirming = Some(Confirming { keys: request.keys.into(), reply: request.reply });
		self.confirm_next();
	}

	fn confirm_next(&mut self) {
		let next = self.confirming.as_mut().and_then(|c| c.keys.pop_front());
		match next {
			Some(key) => {
				self.reporter.verbose(format!("* key {} confirm requested for {};", key.user_id, key.domain));
				self.reporter.emit(PipelineEvent::KeyConfirm(key));
			},
			None => self.stop_confirming(),
		}
	}

	fn stop_confirming(&mut self) {
		if let Some(confirming) = self.confirming.take() {
			/* The fetcher may have given up waiting already */
			let _ = confirming.reply.send(());
		}
	}

	fn on_exit(&mut self) {
		if self.progressed {
			self.reporter.emit(PipelineEvent::Progress(Some(1.0)));
			self.progressed = false;
		}
		self.reporter.verbose(format!("Processed: {}; skipped: {}.", self.processed(), self.skipped()));
	}

	fn cancel(&mut self) -> PullOutcome {
		self.queue.clear();
		self.stop_confirming();
		self.on_exit();
		self.reporter.verbose("Cancelled.");
		self.reporter.emit(PipelineEvent::Cancelled);
		PullOutcome::Cancelled
	}

	fn finish(&mut self) -> PullOutcome {
		self.on_exit();
		self.reporter.verbose("Finished.");
		self.reporter.emit(PipelineEvent::Finished);
		PullOutcome::Finished
	}
}
