mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use sp_core::config::Config;
use sp_core::events::{EventBus, EventPayload, SessionOutcome};
use sp_core::{Error, Segment, VideoInfo};
use sp_stream::{
    AfterCallback, JsonSegmentStore, PlaybackSession, SegmentOpener, SegmentPhase, SessionState,
};

use common::{pseudo_random, segments, EndlessOpener, MemoryOpener, RecordingDecoder};

const SETTLE: Duration = Duration::from_secs(10);

fn counting(counter: &Arc<AtomicUsize>) -> AfterCallback {
    let counter = Arc::clone(counter);
    AfterCallback::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn memory_opener(count: usize, len: usize) -> (MemoryOpener, Vec<Vec<u8>>) {
    let mut opener = MemoryOpener::new();
    let mut bodies = Vec::new();
    for i in 0..count {
        let body = pseudo_random(len + i * 17, i as u64 + 1);
        opener = opener.with_body(&format!("seg-{i}.flv"), body.clone());
        bodies.push(body);
    }
    (opener, bodies)
}

async fn settle(session: &PlaybackSession) {
    tokio::time::timeout(SETTLE, session.wait())
        .await
        .expect("session did not settle in time");
}

async fn wait_for_phase(session: &PlaybackSession, phase: SegmentPhase) {
    for _ in 0..500 {
        if session.phase() == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("phase {phase:?} never reached; now {:?}", session.phase());
}

fn sha256(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

#[tokio::test]
async fn segments_play_in_order_one_decoder_at_a_time() {
    let decoder = RecordingDecoder::new().finish_delay(Duration::from_millis(20));
    let (opener, bodies) = memory_opener(4, 50_000);

    let session = PlaybackSession::builder(
        segments(4),
        Arc::new(decoder.clone()),
        Arc::new(opener.clone()),
    )
    .build();
    session.run().unwrap();
    settle(&session).await;

    assert_eq!(session.state(), SessionState::Completed);
    let expected_log: Vec<String> = (0..4)
        .flat_map(|i| [format!("start {i}"), format!("eof {i}"), format!("finish {i}")])
        .collect();
    assert_eq!(decoder.log(), expected_log);
    assert_eq!(
        opener.opened(),
        vec!["seg-0.flv", "seg-1.flv", "seg-2.flv", "seg-3.flv"]
    );
    assert_eq!(decoder.stream(), bodies.concat());
    assert_eq!(session.cursor(), 3);
    assert_eq!(session.phase(), SegmentPhase::Done);
}

#[tokio::test]
async fn stop_mid_segment_closes_pipe_and_fires_callback_once() {
    let decoder = RecordingDecoder::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let session = PlaybackSession::builder(
        segments(3),
        Arc::new(decoder.clone()),
        Arc::new(EndlessOpener),
    )
    .with_after(counting(&calls))
    .build();
    session.run().unwrap();

    decoder.wait_for_log("start 0").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stoppers: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.stop() })
        })
        .collect();
    session.stop();
    for stopper in stoppers {
        stopper.await.unwrap();
    }

    settle(&session).await;
    // The decoder saw EOF: the write end was closed.
    decoder.wait_for_log("eof 0").await;

    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!decoder.log().contains(&"start 1".to_string()));
    assert!(!decoder.stream().is_empty());

    // Stopping a settled session changes nothing.
    session.stop();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn callback_fires_once_on_completion() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (opener, _) = memory_opener(2, 1000);

    let session = PlaybackSession::builder(
        segments(2),
        Arc::new(RecordingDecoder::new()),
        Arc::new(opener),
    )
    .with_after(counting(&calls))
    .build();
    session.run().unwrap();
    settle(&session).await;

    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn callback_fires_once_on_cancellation_before_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let decoder = RecordingDecoder::new();
    let (opener, _) = memory_opener(2, 1000);

    let session = PlaybackSession::builder(
        segments(2),
        Arc::new(decoder.clone()),
        Arc::new(opener.clone()),
    )
    .with_after(counting(&calls))
    .build();

    session.stop();
    session.run().unwrap();
    settle(&session).await;

    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(decoder.log().is_empty());
    assert!(opener.opened().is_empty());
    assert!(!session.is_done());
}

#[tokio::test]
async fn callback_fires_once_on_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (opener, _) = memory_opener(2, 1000);

    let session = PlaybackSession::builder(
        segments(2),
        Arc::new(RecordingDecoder::new().fail_on(0)),
        Arc::new(opener),
    )
    .with_after(counting(&calls))
    .build();
    session.run().unwrap();
    settle(&session).await;

    assert!(matches!(session.state(), SessionState::Failed(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mirror_matches_pipe_bytes_for_a_million_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let body = pseudo_random(1_000_000, 0x5eed);
    let opener = MemoryOpener::new().with_body("seg-0.flv", body.clone());
    let decoder = RecordingDecoder::new();

    let session = PlaybackSession::builder(
        segments(1),
        Arc::new(decoder.clone()),
        Arc::new(opener),
    )
    .with_mirror_dir(dir.path())
    .with_queue_depth(3)
    .build();
    session.run().unwrap();
    settle(&session).await;

    let piped = decoder.segment_bytes(0);
    let mirrored = std::fs::read(dir.path().join("seg-0.flv")).unwrap();
    assert_eq!(piped.len(), 1_000_000);
    assert_eq!(sha256(&mirrored), sha256(&piped));
    assert_eq!(sha256(&piped), sha256(&body));
}

#[tokio::test]
async fn plain_callback_takes_no_arguments() {
    let (opener, _) = memory_opener(1, 10);
    let (tx, rx) = tokio::sync::oneshot::channel();

    let session = PlaybackSession::builder(
        segments(1),
        Arc::new(RecordingDecoder::new()),
        Arc::new(opener),
    )
    .with_after(AfterCallback::new(move || {
        let _ = tx.send("called");
    }))
    .build();
    session.run().unwrap();
    settle(&session).await;

    assert_eq!(rx.await.unwrap(), "called");
}

#[tokio::test]
async fn session_callback_receives_the_session() {
    let (opener, _) = memory_opener(1, 10);
    let (tx, rx) = tokio::sync::oneshot::channel();

    let session = PlaybackSession::builder(
        segments(1),
        Arc::new(RecordingDecoder::new()),
        Arc::new(opener),
    )
    .with_metadata(VideoInfo::new("A Song", Duration::from_secs(200), "someone"))
    .with_after(AfterCallback::with_session(move |s| {
        let _ = tx.send((s.id(), s.title().to_string(), s.state()));
    }))
    .build();
    session.run().unwrap();
    settle(&session).await;

    let (id, title, state) = rx.await.unwrap();
    assert_eq!(id, session.id());
    assert_eq!(title, "A Song");
    assert_eq!(state, SessionState::Completed);
}

#[tokio::test]
async fn panicking_callback_is_swallowed() {
    let (opener, _) = memory_opener(1, 10);
    let session = PlaybackSession::builder(
        segments(1),
        Arc::new(RecordingDecoder::new()),
        Arc::new(opener),
    )
    .with_after(AfterCallback::new(|| panic!("callback exploded")))
    .build();
    session.run().unwrap();
    settle(&session).await;

    assert_eq!(session.state(), SessionState::Completed);
}

#[tokio::test]
async fn three_local_files_concatenate_and_done_follows_last_signal() {
    let dir = tempfile::tempdir().unwrap();
    let contents: Vec<Vec<u8>> = (0..3).map(|i| pseudo_random(70_000 + i * 1000, 40 + i as u64)).collect();
    let local: Vec<Segment> = contents
        .iter()
        .enumerate()
        .map(|(i, body)| {
            let path = dir.path().join(format!("part-{i}.flv"));
            std::fs::write(&path, body).unwrap();
            Segment::local(i as u32, path, format!("part-{i}.flv"))
        })
        .collect();

    let decoder = RecordingDecoder::new();
    let release = decoder.hold(2);
    let session = PlaybackSession::builder(
        local,
        Arc::new(decoder.clone()),
        Arc::new(SegmentOpener::from_config(&Config::default()).unwrap()),
    )
    .build();
    assert!(!session.is_done());

    session.run().unwrap();
    decoder.wait_for_log("eof 2").await;
    wait_for_phase(&session, SegmentPhase::AwaitingDecoder).await;
    assert!(!session.is_done());
    assert_eq!(session.cursor(), 2);

    release.send(()).unwrap();
    settle(&session).await;

    assert!(session.is_done());
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(decoder.stream(), contents.concat());
}

#[tokio::test]
async fn decoder_start_failure_on_second_segment_keeps_first_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let (opener, bodies) = memory_opener(3, 20_000);
    let decoder = RecordingDecoder::new().fail_on(1);
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));

    let session = PlaybackSession::builder(
        segments(3),
        Arc::new(decoder.clone()),
        Arc::new(opener.clone()),
    )
    .with_mirror_dir(dir.path())
    .with_events(Arc::clone(&bus))
    .with_after(counting(&calls))
    .build();
    session.run().unwrap();
    settle(&session).await;

    match session.state() {
        SessionState::Failed(message) => assert!(message.contains("refusing segment 1")),
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(decoder.log(), vec!["start 0", "eof 0", "finish 0"]);
    assert_eq!(opener.opened(), vec!["seg-0.flv"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(std::fs::read(dir.path().join("seg-0.flv")).unwrap(), bodies[0]);
    assert!(!dir.path().join("seg-1.flv").exists());
    assert!(!dir.path().join("seg-2.flv").exists());

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let EventPayload::SegmentFailed { index, .. } = event.payload {
            assert_eq!(index, 1);
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn run_twice_is_rejected() {
    let (opener, _) = memory_opener(1, 10);
    let session = PlaybackSession::builder(
        segments(1),
        Arc::new(RecordingDecoder::new()),
        Arc::new(opener),
    )
    .build();

    session.run().unwrap();
    assert!(matches!(session.run(), Err(Error::AlreadyRunning)));
    settle(&session).await;
    assert!(matches!(session.run(), Err(Error::AlreadyRunning)));
}

#[tokio::test]
async fn events_follow_the_session_lifecycle() {
    let (opener, _) = memory_opener(2, 100);
    let bus = Arc::new(EventBus::new(64));

    let session = PlaybackSession::builder(
        segments(2),
        Arc::new(RecordingDecoder::new()),
        Arc::new(opener),
    )
    .with_events(Arc::clone(&bus))
    .build();
    session.run().unwrap();
    settle(&session).await;

    let mut payloads: Vec<EventPayload> = bus
        .recent_events(100)
        .into_iter()
        .map(|e| {
            assert_eq!(e.session, session.id());
            e.payload
        })
        .collect();
    payloads.reverse();

    assert_eq!(payloads.len(), 6);
    assert_eq!(payloads[0], EventPayload::SessionStarted { segments: 2 });
    assert_eq!(
        payloads[1],
        EventPayload::SegmentStarted {
            index: 0,
            file_name: "seg-0.flv".into()
        }
    );
    assert!(matches!(payloads[2], EventPayload::SegmentCompleted { index: 0, bytes: 100 }));
    assert!(matches!(payloads[4], EventPayload::SegmentCompleted { index: 1, bytes: 117 }));
    assert_eq!(
        payloads[5],
        EventPayload::SessionSettled {
            outcome: SessionOutcome::Completed
        }
    );
}

#[tokio::test]
async fn store_records_only_after_full_success() {
    let dir = tempfile::tempdir().unwrap();
    let item_dir = dir.path().join("av170001");
    let store = Arc::new(JsonSegmentStore::new(&item_dir));
    let (opener, _) = memory_opener(2, 500);

    let session = PlaybackSession::builder(
        segments(2),
        Arc::new(RecordingDecoder::new()),
        Arc::new(opener.clone()),
    )
    .with_metadata(VideoInfo::new("t", Duration::from_secs(1), "u"))
    .with_mirror_dir(&item_dir)
    .with_store(store.clone())
    .build();
    session.run().unwrap();
    settle(&session).await;

    assert!(store.is_recorded());
    let (info, local) = store.local_segments().await.unwrap().unwrap();
    assert_eq!(info.title, "t");
    assert_eq!(local.len(), 2);

    let failed_dir = dir.path().join("failed");
    let failed_store = Arc::new(JsonSegmentStore::new(&failed_dir));
    let session = PlaybackSession::builder(
        segments(2),
        Arc::new(RecordingDecoder::new().fail_on(1)),
        Arc::new(opener),
    )
    .with_mirror_dir(&failed_dir)
    .with_store(failed_store.clone())
    .build();
    session.run().unwrap();
    settle(&session).await;

    assert!(matches!(session.state(), SessionState::Failed(_)));
    assert!(!failed_store.is_recorded());
}

#[tokio::test]
async fn stop_racing_completion_settles_once() {
    for round in 0..20 {
        let calls = Arc::new(AtomicUsize::new(0));
        let (opener, _) = memory_opener(2, 2_000);

        let session = PlaybackSession::builder(
            segments(2),
            Arc::new(RecordingDecoder::new()),
            Arc::new(opener),
        )
        .with_after(counting(&calls))
        .build();
        session.run().unwrap();

        let stopper = {
            let session = session.clone();
            tokio::spawn(async move {
                // Stagger the first stop so some rounds finish first.
                for _ in 0..round {
                    tokio::task::yield_now().await;
                }
                while !session.state().is_terminal() {
                    session.stop();
                    tokio::task::yield_now().await;
                }
            })
        };

        settle(&session).await;
        stopper.await.unwrap();
        session.stop();

        let state = session.state();
        assert!(
            matches!(state, SessionState::Completed | SessionState::Cancelled),
            "round {round}: unexpected state {state:?}"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1, "round {round}");
        assert_eq!(session.state(), state, "round {round}: outcome changed after settling");
    }
}

#[tokio::test]
async fn unwritable_mirror_does_not_interrupt_playback() {
    let tmp = tempfile::tempdir().unwrap();
    // A regular file where the mirror directory should be.
    let not_a_dir = tmp.path().join("mirror");
    std::fs::write(&not_a_dir, b"occupied").unwrap();

    let decoder = RecordingDecoder::new();
    let (opener, bodies) = memory_opener(3, 20_000);
    let calls = Arc::new(AtomicUsize::new(0));

    let session = PlaybackSession::builder(
        segments(3),
        Arc::new(decoder.clone()),
        Arc::new(opener),
    )
    .with_mirror_dir(&not_a_dir)
    .with_after(counting(&calls))
    .build();
    session.run().unwrap();
    settle(&session).await;

    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(decoder.stream(), bodies.concat());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(&not_a_dir).unwrap(), b"occupied");
}
