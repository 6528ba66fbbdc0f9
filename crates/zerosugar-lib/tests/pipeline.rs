use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use zerosugar::pipeline::{PipelineEvent, PipelineHandle, PullOutcome};
use zerosugar::{Feed, NetworkUse, Pipeline};
use zerosugar_test_utils::*;

const ROOT: &str = "http://example.com/root.xml";
const ARCHIVE: &str = "http://example.com/root-1.0.tar.gz";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Answer {
	Accept,
	Deny,
	/// Cancels on the first verbose line starting with this.
	CancelOn(&'static str),
}

/// Collects events until the pull is over, answering as told.
async fn follow(events: &mut UnboundedReceiver<PipelineEvent>, handle: &PipelineHandle, answer: Answer) -> Vec<PipelineEvent> {
	let mut seen = Vec::new();
	while let Some(event) = events.recv().await {
		match (&event, answer) {
			(PipelineEvent::KeyConfirm(key), Answer::Accept) => handle.accept(key.clone()),
			(PipelineEvent::KeyConfirm(_), Answer::Deny) => handle.deny(),
			(PipelineEvent::Verbose(line), Answer::CancelOn(prefix)) if line.starts_with(prefix) => handle.cancel(),
			_ => {},
		}
		let done = matches!(event, PipelineEvent::Finished | PipelineEvent::Cancelled);
		seen.push(event);
		if done {
			break;
		}
	}
	seen
}

fn verbose(events: &[PipelineEvent]) -> Vec<&str> {
	events.iter()
		.filter_map(|e| match e {
			PipelineEvent::Verbose(line) => Some(line.as_str()),
			_ => None,
		})
		.collect()
}

/// Serves a signed root feed with one implementation and its archive.
fn publish_root(env: &TestEnv, key: &SigningKey) -> String {
	let archive = tar_gz(&[("hello.txt", b"hello")]).unwrap();
	let id = archive_digest(&archive).unwrap();
	let document = json!({
		"uri": ROOT,
		"last-modified": 1000,
		"implementations": [{
			"id": id,
			"version": "1.0",
			"archives": [{ "href": ARCHIVE, "size": archive.len() }],
		}],
	});
	env.transport.add(ROOT, signed_feed(&document, key, Some("Example <dev@example.com>")).unwrap());
	env.transport.add(ARCHIVE, archive);
	id
}

#[tokio::test]
async fn cached_interfaces_are_skipped() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let id = env.store_archive(&tar_gz(&[("hello.txt", b"hello")]).unwrap()).unwrap();
	env.cache_feed(&json!({
		"uri": ROOT,
		"last-modified": 1000,
		"implementations": [{ "id": id, "version": "1.0" }],
	})).unwrap();

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&[ROOT], None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	assert_eq!(outcome, PullOutcome::Finished);
	assert_eq!(pipeline.processed(), 0);
	assert_eq!(pipeline.skipped(), 1);
	assert!(env.transport.requests().is_empty());
	assert!(pipeline.policy().unwrap().ready());
	assert_eq!(verbose(&seen).last(), Some(&"Finished."));
	assert!(verbose(&seen).contains(&"Processed: 0; skipped: 1."));
}

#[tokio::test]
async fn accepted_key_downloads_everything() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let key = signing_key(7);
	let id = publish_root(&env, &key);

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&[ROOT], None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	assert_eq!(outcome, PullOutcome::Finished, "{:#?}", verbose(&seen));
	assert_eq!(pipeline.processed(), 1);
	assert!(seen.iter().any(|e| matches!(e, PipelineEvent::KeyConfirm(k) if k.fingerprint == fingerprint(&key) && k.domain == "example.com")));
	assert!(verbose(&seen).iter().any(|l| l.starts_with("* trusting ")));
	assert!(env.session.trust.is_trusted(&fingerprint(&key), "example.com"));
	assert!(env.session.stores.contains(&id));
	assert_eq!(env.transport.requests(), vec![ROOT.to_string(), ARCHIVE.to_string()]);

	let policy = pipeline.policy().unwrap();
	assert!(policy.ready());
	assert_eq!(policy.solution().unwrap().selected(ROOT).unwrap().id, id);

	let last_progress = seen.iter().rev().find_map(|e| match e {
		PipelineEvent::Progress(p) => Some(*p),
		_ => None,
	});
	if let Some(last) = last_progress {
		assert_eq!(last, Some(1.0));
	}
}

#[tokio::test]
async fn denied_key_cancels() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let key = signing_key(8);
	publish_root(&env, &key);

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&[ROOT], None, false),
		follow(&mut events, &handle, Answer::Deny),
	);

	assert_eq!(outcome, PullOutcome::Cancelled);
	assert!(pipeline.cancelled_by_intention());
	assert!(verbose(&seen).contains(&"* key confirm was denied;"));
	assert!(!seen.contains(&PipelineEvent::Finished));
	assert!(!env.session.trust.is_trusted(&fingerprint(&key), "example.com"));

	let policy = pipeline.policy().unwrap();
	assert!(!policy.ready());
	assert_eq!(policy.solution().map(|s| s.implementations().count()), Some(0));
}

#[tokio::test]
async fn cancel_stops_downloads() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	env.transport.hang(ROOT);

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&[ROOT], None, false),
		follow(&mut events, &handle, Answer::CancelOn("Download feed")),
	);

	assert_eq!(outcome, PullOutcome::Cancelled);
	assert!(pipeline.cancelled_by_intention());
	assert!(seen.contains(&PipelineEvent::Cancelled));
	assert!(!seen.contains(&PipelineEvent::Finished));
	assert_eq!(verbose(&seen).last(), Some(&"Cancelled."));
}

#[tokio::test]
async fn bad_interface_cancels_before_anything_runs() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let missing = env.path("missing.json").to_string_lossy().to_string();

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let pull_names = [missing.as_str()];
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&pull_names, None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	assert_eq!(outcome, PullOutcome::Cancelled);
	assert_eq!(pipeline.processed(), 0);
	assert_eq!(pipeline.skipped(), 1);
	assert!(!pipeline.cancelled_by_intention());
	assert!(verbose(&seen).iter().any(|l| l.starts_with("bad interface name")));
	assert!(env.transport.requests().is_empty());
}

#[tokio::test]
async fn unknown_interface_fails() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&[ROOT], None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	assert_eq!(outcome, PullOutcome::Cancelled);
	assert_eq!(pipeline.processed(), 1);
	assert!(!pipeline.cancelled_by_intention());
	assert!(verbose(&seen).iter().any(|l| l.contains("failed to resolve")));
	assert_eq!(env.transport.requests(), vec![ROOT.to_string()]);
}

#[tokio::test]
async fn refresh_fetches_feeds_again() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let key = signing_key(9);
	env.session.trust.trust_key(&fingerprint(&key), "example.com").unwrap();
	publish_root(&env, &key);

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.refresh(&[ROOT], None),
		follow(&mut events, &handle, Answer::Deny),
	);

	assert_eq!(outcome, PullOutcome::Finished);
	assert!(verbose(&seen).iter().any(|l| l.starts_with("Refresh feed for service")));
	assert_eq!(env.transport.requests(), vec![ROOT.to_string()]);
	assert!(env.session.catalog.get_feed(ROOT).unwrap().is_some());
}

#[tokio::test]
async fn staleness_follows_freshness() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();
	env.session.catalog.add_feed(Feed {
		url: ROOT.to_string(),
		last_modified: Some(now - 3),
		last_checked: Some(now - 3),
		..Default::default()
	});

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, _) = tokio::join!(
		pipeline.pull(&[ROOT], Some(NetworkUse::Offline), false),
		follow(&mut events, &handle, Answer::Accept),
	);
	assert_eq!(outcome, PullOutcome::Finished);

	pipeline.policy_mut().unwrap().set_freshness(1);
	assert!(pipeline.is_stale());
	pipeline.policy_mut().unwrap().set_freshness(10);
	assert!(!pipeline.is_stale());
	assert!(env.transport.requests().is_empty());
}

#[tokio::test]
async fn refreshed_feed_goes_stale() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let key = signing_key(10);
	env.session.trust.trust_key(&fingerprint(&key), "example.com").unwrap();
	publish_root(&env, &key);

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, _) = tokio::join!(
		pipeline.refresh(&[ROOT], None),
		follow(&mut events, &handle, Answer::Deny),
	);
	assert_eq!(outcome, PullOutcome::Finished);

	tokio::time::sleep(std::time::Duration::from_secs(2)).await;
	pipeline.policy_mut().unwrap().set_freshness(1);
	assert!(pipeline.is_stale());
	pipeline.policy_mut().unwrap().set_freshness(60);
	assert!(!pipeline.is_stale());
}

/// Caches a root feed whose only implementation comes from `ARCHIVE`.
fn cache_root_with_archive(env: &TestEnv) -> String {
	let archive = tar_gz(&[("hello.txt", b"hello")]).unwrap();
	let id = archive_digest(&archive).unwrap();
	env.cache_feed(&json!({
		"uri": ROOT,
		"last-modified": 1000,
		"implementations": [{
			"id": id,
			"version": "1.0",
			"archives": [{ "href": ARCHIVE, "size": archive.len() }],
		}],
	})).unwrap();
	env.transport.add(ARCHIVE, archive);
	id
}

#[tokio::test]
async fn native_package_failure_falls_back_to_archives() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let archive = tar_gz(&[("hello.txt", b"hello")]).unwrap();
	let id = archive_digest(&archive).unwrap();
	env.cache_feed(&json!({
		"uri": ROOT,
		"last-modified": 1000,
		"implementations": [
			{ "id": "package:root", "version": "2.0", "package": "root", "installed": false },
			{ "id": id, "version": "1.0", "archives": [{ "href": ARCHIVE, "size": archive.len() }] },
		],
	})).unwrap();
	env.transport.add(ARCHIVE, archive);

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&[ROOT], None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	let lines = verbose(&seen);
	assert_eq!(outcome, PullOutcome::Finished, "{:#?}", lines);
	assert!(lines.iter().any(|l| l.ends_with("failed from native packaging system, will try pure zero ones;")));
	assert_eq!(pipeline.policy().unwrap().solution().unwrap().selected(ROOT).unwrap().id, id);
	assert!(env.session.stores.contains(&id));
	assert_eq!(env.transport.requests(), vec![ARCHIVE.to_string()]);
}

#[tokio::test]
async fn failed_archive_download_cancels() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let archive = tar_gz(&[("hello.txt", b"hello")]).unwrap();
	let id = archive_digest(&archive).unwrap();
	env.cache_feed(&json!({
		"uri": ROOT,
		"last-modified": 1000,
		"implementations": [{ "id": id, "version": "1.0", "archives": [{ "href": ARCHIVE }] }],
	})).unwrap();

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&[ROOT], None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	let lines = verbose(&seen);
	assert_eq!(outcome, PullOutcome::Cancelled, "{:#?}", lines);
	assert!(!pipeline.cancelled_by_intention());
	assert!(lines.iter().any(|l| l.starts_with("* ") && l.ends_with(" failed;")));
	assert!(!env.session.stores.contains(&id));
	assert_eq!(env.transport.requests(), vec![ARCHIVE.to_string()]);
}

#[tokio::test]
async fn cancel_stops_implementation_downloads() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let id = cache_root_with_archive(&env);
	env.transport.hang(ARCHIVE);

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&[ROOT], None, false),
		follow(&mut events, &handle, Answer::CancelOn("Download files")),
	);

	assert_eq!(outcome, PullOutcome::Cancelled);
	assert!(pipeline.cancelled_by_intention());
	assert!(!seen.contains(&PipelineEvent::Finished));
	assert_eq!(verbose(&seen).last(), Some(&"Cancelled."));
	assert!(!env.session.stores.contains(&id));
}

/// A root interface that only has sources, and a compile tool running `script`.
#[cfg(unix)]
struct BuildEnv {
	env: TestEnv,
	_tools: tempfile::TempDir,
	root: String,
}

/// `script` may use `BUILT_DIR`, `BUILT_FEED` and `MARKER`, they are replaced by paths
/// inside the session's directory.
#[cfg(unix)]
fn build_env(script: &str) -> BuildEnv {
	use std::os::unix::fs::PermissionsExt;

	let tools = tempfile::tempdir().unwrap();
	let compile_dir = tools.path().join("compile");
	std::fs::create_dir_all(&compile_dir).unwrap();
	let compile_feed = tools.path().join("compile.json").to_string_lossy().to_string();
	std::fs::write(&compile_feed, serde_json::to_vec(&json!({
		"uri": compile_feed,
		"implementations": [{ "id": "./compile", "version": "1.0", "main": "autocompile.sh" }],
	})).unwrap()).unwrap();

	let compile_uri = compile_feed.clone();
	let env = TestEnv::with_config(move |config| config.set_compile_interface(compile_uri)).unwrap();

	let built_feed = env.path("built.json").to_string_lossy().to_string();
	let script = script
		.replace("BUILT_DIR", &env.path("built").to_string_lossy())
		.replace("BUILT_FEED", &built_feed)
		.replace("MARKER", &env.path("marker").to_string_lossy());
	let script_path = compile_dir.join("autocompile.sh");
	std::fs::write(&script_path, script).unwrap();
	std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

	std::fs::create_dir_all(env.path("src")).unwrap();
	let root_path = env.local_feed("root.json", &json!({
		"uri": "root",
		"implementations": [{ "id": "./src", "version": "1.0", "machine": "src" }],
	})).unwrap();
	let root = zerosugar::model::canonical_iface_uri(&root_path).unwrap();
	env.set_interface(zerosugar::Interface {
		uri: root.clone(),
		extra_feeds: vec![zerosugar::model::FeedReference::new(built_feed)],
		..Default::default()
	}).unwrap();

	BuildEnv { env, _tools: tools, root }
}

#[cfg(unix)]
const WORKING_BUILD: &str = concat!(
	"#!/bin/sh\n",
	"echo \"compiling $2\"\n",
	"mkdir -p \"BUILT_DIR\"\n",
	"cat > \"BUILT_FEED\" <<END\n",
	"{\"uri\": \"BUILT_FEED\", \"implementations\": [{\"id\": \"./built\", \"version\": \"1.0\", \"main\": \"run.sh\"}]}\n",
	"END\n",
);

#[cfg(unix)]
#[tokio::test]
async fn source_only_interface_is_built() {
	let _ = env_logger::builder().is_test(true).try_init();
	let BuildEnv { env, root, _tools } = build_env(WORKING_BUILD);

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let pull_names = [root.as_str()];
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&pull_names, None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	let lines = verbose(&seen);
	assert_eq!(outcome, PullOutcome::Finished, "{:#?}", lines);
	assert!(lines.iter().any(|l| l.ends_with("needs to be built from sources;")));
	assert!(lines.contains(&"* sources found;"));
	assert!(lines.contains(&format!("compiling {}", root).as_str()));

	let policy = pipeline.policy().unwrap();
	assert!(policy.ready());
	let selected = policy.solution().unwrap().selected(&root).unwrap();
	assert!(selected.id.ends_with("built"));
	assert!(env.transport.requests().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn failing_build_cancels() {
	let _ = env_logger::builder().is_test(true).try_init();
	let BuildEnv { env, root, _tools } = build_env("#!/bin/sh\necho \"broken\"\nexit 3\n");

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let pull_names = [root.as_str()];
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&pull_names, None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	let lines = verbose(&seen);
	assert_eq!(outcome, PullOutcome::Cancelled, "{:#?}", lines);
	assert!(!pipeline.cancelled_by_intention());
	assert!(lines.contains(&"broken"));
	assert!(lines.contains(&"* failed to build;"));
	assert!(!lines.contains(&"* done;"));
}

#[cfg(unix)]
#[tokio::test]
async fn cancelled_build_runs_to_completion() {
	let _ = env_logger::builder().is_test(true).try_init();
	let BuildEnv { env, root, _tools } = build_env("#!/bin/sh\nsleep 1\ntouch \"MARKER\"\n");

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let pull_names = [root.as_str()];
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&pull_names, None, false),
		follow(&mut events, &handle, Answer::CancelOn("Build service")),
	);

	assert_eq!(outcome, PullOutcome::Cancelled);
	assert!(pipeline.cancelled_by_intention());
	assert!(!seen.contains(&PipelineEvent::Finished));
	assert!(env.path("marker").exists());
}

#[tokio::test]
async fn unbuildable_dependency_stops_before_building() {
	let _ = env_logger::builder().is_test(true).try_init();
	let env = TestEnv::new().unwrap();
	let bad = env.local_feed("bad.json", &json!({
		"uri": "bad",
		"implementations": [{ "id": "./bad", "version": "1.0", "machine": "mips64" }],
	})).unwrap();
	let lib = env.local_feed("lib.json", &json!({
		"uri": "lib",
		"implementations": [{ "id": "./lib", "version": "1.0", "requires": [{ "interface": bad }] }],
	})).unwrap();
	/* Sources come from a feed only source solves read */
	env.set_interface(zerosugar::Interface {
		uri: lib.clone(),
		extra_feeds: vec![zerosugar::model::FeedReference {
			uri: env.path("lib-src.json").to_string_lossy().to_string(),
			os: None,
			machine: Some("src".to_string()),
		}],
		..Default::default()
	}).unwrap();
	let root = env.local_feed("root.json", &json!({
		"uri": "root",
		"implementations": [{ "id": "./root", "version": "1.0", "requires": [{ "interface": lib }] }],
	})).unwrap();

	let (mut pipeline, handle, mut events) = Pipeline::new(env.session.clone());
	let pull_names = [root.as_str()];
	let (outcome, seen) = tokio::join!(
		pipeline.pull(&pull_names, None, false),
		follow(&mut events, &handle, Answer::Accept),
	);

	let lines = verbose(&seen);
	assert_eq!(outcome, PullOutcome::Cancelled, "{:#?}", lines);
	assert!(lines.iter().any(|l| l.ends_with("needs to be built from sources;")));
	assert!(lines.iter().any(|l| l.contains("failed to resolve") && l.contains("Unsupported machine type")));
	assert!(!lines.iter().any(|l| l.starts_with("Build service") || l.starts_with("* add ")));
	assert!(env.transport.requests().is_empty());
}
