//! Streaming delivery: event order, replay, heartbeat, timeout, disconnects and
//! concurrent streams

mod test_support;

use reportgen::engine::module_cache_key;
use reportgen::engine::test_support::{ScriptedBackend, SlowStore};
use reportgen::{ContentCache, ContentResponse, FileStore, StreamEvent, StreamMode, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use test_support::{PROFILE_MODULES, orchestrator, orchestrator_with, profile_request, quiet_settings};

fn names(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::name).collect()
}

fn count(events: &[StreamEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

#[tokio::test]
async fn fresh_stream_emits_events_in_order() {
    let backend = Arc::new(ScriptedBackend::new());
    let orch = orchestrator(Arc::clone(&backend));

    let events = orch
        .stream(profile_request("u1"), Some(StreamMode::Standard))
        .collect()
        .await;
    let names = names(&events);

    assert_eq!(&names[..3], &["connected", "status", "init"]);
    assert_eq!(names.last(), Some(&"complete"));
    assert_eq!(count(&events, "module-complete"), 5);
    assert_eq!(count(&events, "complete"), 1);

    // Every module event is followed by a progress update
    for (i, name) in names.iter().enumerate() {
        if *name == "module-complete" {
            assert_eq!(names[i + 1], "progress");
        }
    }

    match &events[2] {
        StreamEvent::Init {
            module_ids, title, ..
        } => {
            assert_eq!(module_ids, &PROFILE_MODULES.map(String::from).to_vec());
            assert_eq!(title, "Personal Profile");
        }
        other => panic!("expected init, got {other:?}"),
    }
    match events.last() {
        Some(StreamEvent::Complete {
            completed_module_ids,
            failed_module_ids,
            ..
        }) => {
            assert_eq!(completed_module_ids.len(), 5);
            assert!(failed_module_ids.is_empty());
        }
        other => panic!("expected complete, got {other:?}"),
    }

    orch.wait_idle().await;
    assert_eq!(
        orch.status(&profile_request("u1")).await.unwrap().status,
        Some(TaskStatus::Completed)
    );
}

#[tokio::test]
async fn module_failures_are_reported_without_ending_the_stream() {
    let backend = Arc::new(ScriptedBackend::new().failing("career"));
    let orch = orchestrator(Arc::clone(&backend));

    let events = orch.stream(profile_request("u1"), None).collect().await;

    let error = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ModuleError {
                module_id, error, ..
            } => Some((module_id.clone(), error.clone())),
            _ => None,
        })
        .expect("module-error event");
    assert_eq!(error.0, "career");
    assert!(error.1.contains("scripted outage"));
    assert_eq!(count(&events, "module-complete"), 4);

    match events.last() {
        Some(StreamEvent::Complete {
            failed_module_ids, ..
        }) => assert_eq!(failed_module_ids, &vec!["career".to_string()]),
        other => panic!("expected complete, got {other:?}"),
    }
}

#[tokio::test]
async fn existing_task_is_replayed_from_the_store() {
    let backend = Arc::new(ScriptedBackend::new());
    let orch = orchestrator(Arc::clone(&backend));
    orch.create(&profile_request("u1")).await.unwrap();
    orch.wait_idle().await;

    let events = orch.stream(profile_request("u1"), None).collect().await;

    let replayed: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ModuleComplete { cached, .. } => Some(*cached),
            _ => None,
        })
        .collect();
    assert_eq!(replayed, vec![true; 5]);
    assert_eq!(names(&events).last(), Some(&"complete"));

    orch.wait_idle().await;
    assert_eq!(backend.total_calls(), 5);
}

#[tokio::test]
async fn stream_follows_a_run_already_in_progress() {
    let backend = Arc::new(ScriptedBackend::new().with_default_delay(Duration::from_millis(300)));
    let orch = orchestrator(Arc::clone(&backend));
    orch.create(&profile_request("u1")).await.unwrap();

    let events = orch.stream(profile_request("u1"), None).collect().await;

    assert_eq!(count(&events, "module-complete"), 5);
    assert_eq!(names(&events).last(), Some(&"complete"));
    orch.wait_idle().await;
    assert_eq!(backend.total_calls(), 5);
}

#[tokio::test]
async fn heartbeat_pings_while_generation_is_slow() {
    let backend = Arc::new(ScriptedBackend::new().with_default_delay(Duration::from_millis(400)));
    let settings = reportgen::OrchestratorSettings {
        heartbeat_interval: Duration::from_millis(50),
        ..quiet_settings()
    };
    let orch = orchestrator_with(Arc::clone(&backend), ContentCache::in_memory(), settings);

    let events = orch.stream(profile_request("u1"), None).collect().await;

    assert!(count(&events, "ping") >= 2, "events: {:?}", names(&events));
    assert_eq!(names(&events).last(), Some(&"complete"));
}

#[tokio::test]
async fn timeout_closes_the_stream_but_generation_finishes() {
    let backend = Arc::new(ScriptedBackend::new().with_default_delay(Duration::from_millis(500)));
    let settings = reportgen::OrchestratorSettings {
        stream_timeout: Duration::from_millis(100),
        ..quiet_settings()
    };
    let orch = orchestrator_with(Arc::clone(&backend), ContentCache::in_memory(), settings);

    let events = orch.stream(profile_request("u1"), None).collect().await;

    match events.last() {
        Some(StreamEvent::Error { message }) => assert!(message.contains("timed out")),
        other => panic!("expected timeout error, got {other:?}"),
    }
    assert_eq!(count(&events, "module-complete"), 0);

    orch.wait_idle().await;
    let status = orch.status(&profile_request("u1")).await.unwrap();
    assert_eq!(status.status, Some(TaskStatus::Completed));
}

#[tokio::test]
async fn lite_mode_results_survive_client_disconnect() {
    let backend = Arc::new(ScriptedBackend::new().with_default_delay(Duration::from_millis(150)));
    let orch = orchestrator(Arc::clone(&backend));

    let mut stream = orch.stream(profile_request("u1"), Some(StreamMode::Lite));
    while let Some(event) = stream.next().await {
        if let StreamEvent::Connected { mode } = &event {
            assert_eq!(mode, "lite");
        }
        if event.name() == "init" {
            break;
        }
    }
    stream.disconnect();

    orch.wait_idle().await;

    let ContentResponse::Ready(content) = orch.content(&profile_request("u1")).await.unwrap() else {
        panic!("content should be ready after disconnect");
    };
    assert_eq!(content.modules.len(), 5);
    assert_eq!(content.meta.status, TaskStatus::Completed);
}

/// For each `module-complete` event, whether the module's cache entry was
/// readable at the moment the event arrived
async fn cache_readable_on_emit(mode: StreamMode) -> Vec<bool> {
    let backend = Arc::new(ScriptedBackend::new());
    let cache = ContentCache::new(Arc::new(SlowStore::new("module:", Duration::from_millis(400))));
    let orch = orchestrator_with(backend, cache, quiet_settings());

    let mut stream = orch.stream(profile_request("u1"), Some(mode));
    let mut fingerprint = String::new();
    let mut readable = Vec::new();
    while let Some(event) = stream.next().await {
        match &event {
            StreamEvent::Init { fingerprint: fp, .. } => fingerprint = fp.clone(),
            StreamEvent::ModuleComplete { module_id, .. } => {
                let key = module_cache_key("u1", "en", module_id, &fingerprint);
                readable.push(orch.cache().exists(&key).await.unwrap());
            }
            _ => {}
        }
    }
    orch.wait_idle().await;
    readable
}

#[tokio::test]
async fn lite_mode_persists_modules_before_emitting_them() {
    let lite = cache_readable_on_emit(StreamMode::Lite).await;
    assert_eq!(lite, vec![true; 5]);

    // Standard mode writes in the background, so events can run ahead of the cache
    let standard = cache_readable_on_emit(StreamMode::Standard).await;
    assert_eq!(standard.len(), 5);
    assert!(standard.contains(&false), "standard: {standard:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_streams_share_one_generation_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = FileStore::open(dir.path().to_str().unwrap()).unwrap();
    let backend = Arc::new(ScriptedBackend::new().with_default_delay(Duration::from_millis(300)));
    let orch = orchestrator_with(
        Arc::clone(&backend),
        ContentCache::new(Arc::new(store)),
        quiet_settings(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let stream = orch.stream(profile_request("u1"), Some(StreamMode::Standard));
        handles.push(tokio::spawn(stream.collect()));
    }
    for handle in handles {
        let events = handle.await.unwrap();
        assert_eq!(names(&events).last(), Some(&"complete"), "events: {:?}", names(&events));
        assert_eq!(count(&events, "module-complete"), 5);
    }

    orch.wait_idle().await;
    assert_eq!(backend.total_calls(), 5);
}

#[tokio::test]
async fn invalid_report_type_ends_with_error() {
    let orch = orchestrator(Arc::new(ScriptedBackend::new()));
    let mut req = profile_request("u1");
    req.report_type = "tarot".to_string();

    let events = orch.stream(req, None).collect().await;

    assert_eq!(names(&events), vec!["connected", "status", "error"]);
}
