/// Integration tests for the clap detector
///
/// Drives the orchestrator end to end over scripted audio and checks the
/// state transitions, microphone hand-over and dispatched actions.

mod common;

use clap_detector::events::event_channel;
use clap_detector::{
    ActionDispatcher, DetectorControl, DetectorError, DetectorEvent, DetectorService,
    DetectorState, DispatchError, Orchestrator, Trigger, WavSource,
};
use common::*;
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

mock! {
    pub Dispatcher {}

    impl ActionDispatcher for Dispatcher {
        type Action = String;

        fn execute(&self, action: &String) -> Result<(), DispatchError>;
    }
}

/// Run a script to exhaustion and collect everything observable
fn run_script<D>(script: Vec<Chunk>, dispatcher: D) -> (Vec<DetectorEvent>, SourceStats)
where
    D: ActionDispatcher<Action = String>,
{
    run_flaky_script(script, 0, dispatcher)
}

/// Like `run_script`, with opens failing after the first one
fn run_flaky_script<D>(
    script: Vec<Chunk>,
    failing_opens: usize,
    dispatcher: D,
) -> (Vec<DetectorEvent>, SourceStats)
where
    D: ActionDispatcher<Action = String>,
{
    let (events, mut rx) = event_channel();
    let control = DetectorControl::new();
    let source =
        StubSource::new(script, Exhausted::Stop(control.clone())).failing_opens(failing_opens);
    let stats = source.stats();

    let mut orchestrator = Orchestrator::new(
        test_config(),
        source,
        StubEngine,
        dispatcher,
        test_actions(),
        events,
        control,
    )
    .unwrap();

    orchestrator.start().unwrap();
    orchestrator.run();
    drop(orchestrator);

    let events = drain(&mut rx);
    let stats = std::mem::take(&mut *stats.lock().unwrap());
    (events, stats)
}

fn expect_action(action: &'static str) -> MockDispatcher {
    let mut dispatcher = MockDispatcher::new();
    dispatcher
        .expect_execute()
        .withf(move |a: &String| a == action)
        .times(1)
        .returning(|_| Ok(()));
    dispatcher
}

fn expect_nothing() -> MockDispatcher {
    let mut dispatcher = MockDispatcher::new();
    dispatcher.expect_execute().never();
    dispatcher
}

fn triggered(events: &[DetectorEvent]) -> Vec<(u32, Trigger)> {
    events
        .iter()
        .filter_map(|e| match e {
            DetectorEvent::ActionTriggered { count, trigger } => Some((*count, *trigger)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_two_claps_dispatch_primary() {
    let (events, _) = run_script(wake_then(claps(2)), expect_action("primary"));
    assert_eq!(triggered(&events), vec![(2, Trigger::Primary)]);
}

#[test]
fn test_three_claps_dispatch_secondary() {
    let (events, _) = run_script(wake_then(claps(3)), expect_action("secondary"));
    assert_eq!(triggered(&events), vec![(3, Trigger::Secondary)]);
}

#[test]
fn test_unmatched_counts_only_log() {
    for n in [1, 4] {
        let (events, _) = run_script(wake_then(claps(n)), expect_nothing());
        assert!(triggered(&events).is_empty());

        let logs = logs(&events);
        let expected = format!("No match for {} clap(s)", n);
        assert_eq!(
            logs.iter().filter(|m| m.starts_with(&expected)).count(),
            1,
            "logs: {:?}",
            logs
        );
    }
}

#[test]
fn test_no_clap_before_timeout() {
    // 500ms timeout at 64ms per frame closes on the 9th frame
    let script = wake_then(vec![Chunk::Quiet; 10]);
    let (events, _) = run_script(script, expect_nothing());

    assert!(triggered(&events).is_empty());
    assert!(logs(&events)
        .iter()
        .any(|m| m.starts_with("No match for 0 clap(s)")));
}

#[test]
fn test_wake_hands_over_microphone() {
    let (events, stats) = run_script(wake_then(claps(2)), expect_action("primary"));

    assert_eq!(
        states(&events),
        vec![
            DetectorState::AwaitingWakeWord,
            DetectorState::CountingClaps,
            DetectorState::AwaitingWakeWord,
            DetectorState::Idle,
        ]
    );

    // Wake stream, clap stream, wake stream again
    assert_eq!(stats.opened_frame_sizes(), vec![ENGINE_FRAME, 1024, ENGINE_FRAME]);
    assert_eq!(stats.max_open, 1);
    assert_eq!(stats.busy_rejections, 0);
    assert_eq!(stats.open_now, 0);

    // Every open after the first is preceded by a close
    let opens_and_closes: Vec<&Op> = stats
        .ops
        .iter()
        .filter(|op| matches!(op, Op::Open(..) | Op::Close(_)))
        .collect();
    for pair in opens_and_closes.chunks(2) {
        match pair {
            [Op::Open(opened, _), Op::Close(closed)] => assert_eq!(opened, closed),
            other => panic!("Unexpected operation order: {:?}", other),
        }
    }

    assert_eq!(stats.acquires(), 1);
    assert_eq!(stats.releases(), 1);
    assert_eq!(stats.ops.last(), Some(&Op::Release));
}

#[test]
fn test_wake_events_in_order() {
    let (events, _) = run_script(wake_then(claps(3)), expect_action("secondary"));

    let milestones: Vec<&DetectorEvent> = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                DetectorEvent::WakeDetected
                    | DetectorEvent::ListeningForClaps
                    | DetectorEvent::ActionTriggered { .. }
            )
        })
        .collect();

    assert_eq!(
        milestones,
        vec![
            &DetectorEvent::WakeDetected,
            &DetectorEvent::ListeningForClaps,
            &DetectorEvent::ActionTriggered {
                count: 3,
                trigger: Trigger::Secondary
            },
        ]
    );
}

#[test]
fn test_audio_level_reported_per_wake_frame() {
    let script = vec![Chunk::Quiet, Chunk::Loud, Chunk::Quiet];
    let (events, _) = run_script(script, expect_nothing());

    let levels: Vec<f32> = events
        .iter()
        .filter_map(|e| match e {
            DetectorEvent::AudioLevel(l) => Some(*l),
            _ => None,
        })
        .collect();

    assert_eq!(levels.len(), 3);
    approx::assert_relative_eq!(levels[0], 0.0);
    // 5000 RMS against the default 5000 ceiling
    approx::assert_relative_eq!(levels[1], 1.0);
}

#[test]
fn test_transient_errors_swallowed() {
    let mut script = vec![Chunk::Overflow, Chunk::Overflow];
    script.extend(wake_then(claps(2)));
    let (_, stats) = run_script(script, expect_action("primary"));

    assert_eq!(stats.opens(), 3);
}

#[test]
fn test_read_failure_reopens_wake_stream() {
    let mut script = vec![Chunk::Quiet, Chunk::Fail];
    script.extend(wake_then(claps(2)));
    let (events, stats) = run_script(script, expect_action("primary"));

    assert_eq!(triggered(&events), vec![(2, Trigger::Primary)]);
    assert_eq!(
        stats.opened_frame_sizes(),
        vec![ENGINE_FRAME, ENGINE_FRAME, 1024, ENGINE_FRAME]
    );
    assert_eq!(stats.max_open, 1);
}

#[test]
fn test_failed_reopen_retried_with_backoff() {
    let mut script = vec![Chunk::Quiet, Chunk::Fail];
    script.extend(wake_then(claps(2)));

    let started = std::time::Instant::now();
    let (events, stats) = run_flaky_script(script, 2, expect_action("primary"));

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(stats.failed_opens, 2);
    assert_eq!(
        states(&events),
        vec![
            DetectorState::AwaitingWakeWord,
            DetectorState::CountingClaps,
            DetectorState::AwaitingWakeWord,
            DetectorState::Idle,
        ]
    );
    assert_eq!(
        stats.opened_frame_sizes(),
        vec![ENGINE_FRAME, ENGINE_FRAME, 1024, ENGINE_FRAME]
    );
    assert_eq!(triggered(&events), vec![(2, Trigger::Primary)]);
    assert_eq!(stats.max_open, 1);
    assert_eq!(stats.open_now, 0);
}

#[test]
fn test_read_failure_truncates_clap_window() {
    let pattern = vec![Chunk::Loud, Chunk::Quiet, Chunk::Quiet, Chunk::Loud, Chunk::Fail];
    let (events, stats) = run_script(wake_then(pattern), expect_action("primary"));

    assert_eq!(triggered(&events), vec![(2, Trigger::Primary)]);
    assert_eq!(stats.open_now, 0);
}

#[test]
fn test_dispatch_failure_is_reported_not_fatal() {
    let mut dispatcher = MockDispatcher::new();
    dispatcher
        .expect_execute()
        .times(1)
        .returning(|_| Err(DispatchError::Failed("code: not found".to_string())));

    let (events, _) = run_script(wake_then(claps(2)), dispatcher);

    assert!(logs(&events)
        .iter()
        .any(|m| m.contains("Action failed") && m.contains("code: not found")));
    assert_eq!(
        states(&events),
        vec![
            DetectorState::AwaitingWakeWord,
            DetectorState::CountingClaps,
            DetectorState::AwaitingWakeWord,
            DetectorState::Idle,
        ]
    );
}

#[test]
fn test_two_sequences_back_to_back() {
    let mut script = wake_then(claps(2));
    script.extend(wake_then(claps(3)));

    let mut dispatcher = MockDispatcher::new();
    let mut seq = mockall::Sequence::new();
    dispatcher
        .expect_execute()
        .withf(|a: &String| a == "primary")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    dispatcher
        .expect_execute()
        .withf(|a: &String| a == "secondary")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));

    let (events, stats) = run_script(script, dispatcher);
    assert_eq!(
        triggered(&events),
        vec![(2, Trigger::Primary), (3, Trigger::Secondary)]
    );
    assert_eq!(stats.max_open, 1);
}

#[test]
fn test_pause_resume_round_trip() {
    let (events, mut rx) = event_channel();
    let control = DetectorControl::new();
    let source = StubSource::new(Vec::new(), Exhausted::Silence);
    let stats = source.stats();

    let worker_control = control.clone();
    let worker = thread::spawn(move || {
        let mut orchestrator = Orchestrator::new(
            test_config(),
            source,
            StubEngine,
            RecordingDispatcher::default(),
            test_actions(),
            events,
            worker_control,
        )
        .unwrap();
        orchestrator.start().unwrap();
        orchestrator.run();
        orchestrator.stats()
    });

    let timeout = Duration::from_secs(5);
    let mut seen = Vec::new();
    assert!(wait_for_state(&mut rx, DetectorState::AwaitingWakeWord, timeout, &mut seen));

    control.pause();
    assert!(wait_for_state(&mut rx, DetectorState::Paused, timeout, &mut seen));
    {
        let stats = stats.lock().unwrap();
        assert_eq!(stats.open_now, 0);
        assert_eq!(stats.releases(), 1);
    }

    control.resume();
    assert!(wait_for_state(&mut rx, DetectorState::AwaitingWakeWord, timeout, &mut seen));
    {
        let stats = stats.lock().unwrap();
        assert_eq!(stats.open_now, 1);
        assert_eq!(stats.acquires(), 2);
        assert_eq!(stats.opens(), 2);
    }

    control.stop();
    let detector_stats = worker.join().unwrap();
    assert!(detector_stats.frames_processed > 0);
    assert_eq!(detector_stats.wake_words_detected, 0);

    let stats = stats.lock().unwrap();
    assert_eq!(stats.open_now, 0);
    assert_eq!(stats.max_open, 1);
    assert_eq!(stats.releases(), 2);
    assert_eq!(stats.opens(), stats.closes());
}

#[test]
fn test_stop_during_clap_window_releases_everything() {
    let (events, mut rx) = event_channel();
    let control = DetectorControl::new();
    // Wake, one clap, then silence until the stop request
    let source = StubSource::new(
        vec![Chunk::Wake, Chunk::Loud],
        Exhausted::Silence,
    );
    let stats = source.stats();

    let worker_control = control.clone();
    let worker = thread::spawn(move || {
        let mut dispatcher = MockDispatcher::new();
        dispatcher.expect_execute().never();
        let mut orchestrator = Orchestrator::new(
            test_config(),
            source,
            StubEngine,
            dispatcher,
            test_actions(),
            events,
            worker_control,
        )
        .unwrap();
        orchestrator.start().unwrap();
        orchestrator.run();
    });

    let mut seen = Vec::new();
    assert!(wait_for_state(
        &mut rx,
        DetectorState::CountingClaps,
        Duration::from_secs(5),
        &mut seen
    ));
    control.stop();
    worker.join().unwrap();

    seen.extend(drain(&mut rx));
    assert!(triggered(&seen).is_empty());
    assert_eq!(states(&seen).last(), Some(&DetectorState::Idle));
    assert_eq!(stats.lock().unwrap().open_now, 0);
}

#[test]
fn test_wav_replay_end_to_end() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    {
        let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
        let mut write = |value: i16, count: usize| {
            for _ in 0..count {
                writer.write_sample(value).unwrap();
            }
        };

        write(0, ENGINE_FRAME * 2);
        write(WAKE_MARKER, ENGINE_FRAME);
        for chunk in claps(2) {
            let value = if chunk == Chunk::Loud { CLAP_AMPLITUDE } else { 0 };
            write(value, 1024);
        }
        writer.finalize().unwrap();
    }

    let (events, mut rx) = event_channel();
    let control = DetectorControl::new();
    let dispatcher = RecordingDispatcher {
        stop_on_dispatch: Some(control.clone()),
        ..Default::default()
    };

    let mut orchestrator = Orchestrator::new(
        test_config(),
        WavSource::new(file.path()),
        StubEngine,
        dispatcher.clone(),
        test_actions(),
        events,
        control,
    )
    .unwrap();
    orchestrator.start().unwrap();
    orchestrator.run();
    drop(orchestrator);

    assert_eq!(dispatcher.calls(), vec!["primary".to_string()]);
    assert_eq!(triggered(&drain(&mut rx)), vec![(2, Trigger::Primary)]);
}

#[tokio::test]
async fn test_service_start_pause_reload_shutdown() {
    let dispatcher = RecordingDispatcher::default();
    let builds = Arc::new(AtomicUsize::new(0));
    let factory_builds = builds.clone();

    let (mut handle, mut events) = DetectorService::start(
        test_config(),
        test_actions(),
        dispatcher.clone(),
        move |_config: &clap_detector::DetectionConfig| {
            // Only the first worker hears the scripted wake word
            let script = if factory_builds.fetch_add(1, Ordering::SeqCst) == 0 {
                wake_then(claps(2))
            } else {
                Vec::new()
            };
            Ok((StubSource::new(script, Exhausted::Silence), StubEngine))
        },
    )
    .await
    .unwrap();

    assert!(handle.is_running());

    let triggered = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let DetectorEvent::ActionTriggered { count, trigger } = event {
                return Some((count, trigger));
            }
        }
        None
    })
    .await
    .unwrap();
    assert_eq!(triggered, Some((2, Trigger::Primary)));

    handle.pause();
    let paused = tokio::time::timeout(Duration::from_secs(5), async {
        while handle.state() != DetectorState::Paused {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(paused.is_ok());
    handle.resume();

    let mut config = test_config();
    config.amplitude_threshold = 2500.0;
    let previous = handle.reload(config, test_actions()).await.unwrap();
    assert_eq!(previous.actions_dispatched, 1);
    assert_eq!(previous.wake_words_detected, 1);
    assert_eq!(dispatcher.calls(), vec!["primary".to_string()]);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(handle.state(), DetectorState::AwaitingWakeWord);

    let stats = handle.shutdown().await.unwrap();
    assert_eq!(stats.actions_dispatched, 0);
}

#[tokio::test]
async fn test_abandoned_start_releases_microphone() {
    let slot: Arc<Mutex<Option<Arc<Mutex<SourceStats>>>>> = Arc::new(Mutex::new(None));
    let factory_slot = slot.clone();

    let start = DetectorService::start(
        test_config(),
        test_actions(),
        RecordingDispatcher::default(),
        move |_config: &clap_detector::DetectionConfig| {
            // Outlive the caller's patience
            thread::sleep(Duration::from_millis(200));
            let source = StubSource::new(Vec::new(), Exhausted::Silence);
            *factory_slot.lock().unwrap() = Some(source.stats());
            Ok((source, StubEngine))
        },
    );
    assert!(tokio::time::timeout(Duration::from_millis(20), start)
        .await
        .is_err());

    let released = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let done = slot
                .lock()
                .unwrap()
                .as_ref()
                .map(|stats| stats.lock().unwrap().releases() > 0)
                .unwrap_or(false);
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(released.is_ok());

    let stats = slot.lock().unwrap().take().unwrap();
    let stats = stats.lock().unwrap();
    assert_eq!(stats.acquires(), 1);
    assert_eq!(stats.releases(), 1);
    assert_eq!(stats.opens(), stats.closes());
    assert_eq!(stats.open_now, 0);
    assert_eq!(stats.reads, 0);
}

#[tokio::test]
async fn test_service_missing_device_is_fatal() {
    let result = DetectorService::start(
        test_config(),
        test_actions(),
        RecordingDispatcher::default(),
        |_config: &clap_detector::DetectionConfig| Ok((StubSource::unavailable(), StubEngine)),
    )
    .await;

    assert!(matches!(
        result,
        Err(DetectorError::Audio(clap_detector::AudioError::DeviceUnavailable(_)))
    ));
}

#[tokio::test]
async fn test_service_missing_access_key_is_fatal() {
    let mut config = test_config();
    config.access_key = String::new();

    let result = DetectorService::start(
        config,
        test_actions(),
        RecordingDispatcher::default(),
        |_config: &clap_detector::DetectionConfig| {
            Ok((StubSource::new(Vec::new(), Exhausted::Silence), StubEngine))
        },
    )
    .await;

    assert!(matches!(
        result,
        Err(DetectorError::Config(clap_detector::ConfigError::MissingAccessKey))
    ));
}
