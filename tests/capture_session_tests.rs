// Integration tests for the capture session
//
// These run on tokio's paused clock: the synthetic backend emits one chunk
// per second of virtual time, so durations are exact.

use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::sleep;
use typecast::{
    CaptureError, CaptureOptions, CaptureSession, SessionConfig, SessionEvent, SyntheticBackend, SyntheticConfig,
};

fn session_with(config: SyntheticConfig) -> (CaptureSession, std::sync::Arc<std::sync::atomic::AtomicU64>) {
    let backend = SyntheticBackend::new(config);
    let emitted = backend.emitted_bytes();
    (CaptureSession::new(Box::new(backend), SessionConfig::default()), emitted)
}

fn full_hd() -> CaptureOptions {
    CaptureOptions {
        width: 1920,
        height: 1080,
        frame_rate: 30,
        want_audio: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_two_seconds() {
    let (session, emitted) = session_with(SyntheticConfig::default());

    let info = session.start(full_hd()).await.unwrap();
    assert_eq!(info.tracks.len(), 1, "video only");
    assert_eq!(info.mime_type, "video/webm");

    sleep(Duration::from_millis(2000)).await;
    let media = session.stop().await.unwrap();

    assert!(media.duration_ms().abs_diff(2000) <= 50, "duration was {}ms", media.duration_ms());
    assert!(media.size_bytes() > 0);
    assert_eq!(media.size_bytes(), emitted.load(Ordering::SeqCst), "every emitted byte is kept");
    assert_eq!(media.buffer().len() as u64, media.size_bytes());
    assert!(!session.is_recording().await);
}

#[tokio::test(start_paused = true)]
async fn test_paused_span_is_excluded() {
    let (session, _) = session_with(SyntheticConfig::default());

    session.start(full_hd()).await.unwrap();
    sleep(Duration::from_millis(1000)).await;
    assert!(session.pause().await);
    sleep(Duration::from_millis(1000)).await;
    assert!(session.resume().await);
    sleep(Duration::from_millis(1000)).await;

    let media = session.stop().await.unwrap();
    assert!(media.duration_ms().abs_diff(2000) <= 50, "duration was {}ms", media.duration_ms());
}

#[tokio::test(start_paused = true)]
async fn test_duration_while_paused_is_frozen() {
    let (session, _) = session_with(SyntheticConfig::default());

    session.start(full_hd()).await.unwrap();
    sleep(Duration::from_millis(700)).await;
    session.pause().await;
    sleep(Duration::from_millis(5000)).await;

    assert_eq!(session.duration_ms().await, 700);
    let stats = session.stats().await;
    assert!(stats.is_recording);
    assert!(stats.is_paused);
    assert_eq!(stats.duration_ms, 700);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_are_noops_when_invalid() {
    let (session, _) = session_with(SyntheticConfig::default());

    assert!(!session.pause().await, "not recording");
    assert!(!session.resume().await, "not recording");

    session.start(full_hd()).await.unwrap();
    assert!(!session.resume().await, "not paused");
    assert!(session.pause().await);
    assert!(!session.pause().await, "already paused");
}

#[tokio::test(start_paused = true)]
async fn test_stats_count_chunks() {
    let (session, _) = session_with(SyntheticConfig {
        bytes_per_chunk: 1000,
        ..SyntheticConfig::default()
    });

    session.start(full_hd()).await.unwrap();
    sleep(Duration::from_millis(2500)).await;

    let stats = session.stats().await;
    assert!(stats.is_recording);
    assert!(!stats.is_paused);
    assert!(stats.started_at.is_some());
    assert_eq!(stats.chunks_count, 2);
    assert_eq!(stats.bytes_captured, 2000);
    assert_eq!(stats.duration_ms, 2500);
}

#[tokio::test(start_paused = true)]
async fn test_tracks_released_on_stop() {
    let (session, _) = session_with(SyntheticConfig::default());
    let ledger = session.ledger();

    let info = session
        .start(CaptureOptions {
            want_audio: true,
            ..full_hd()
        })
        .await
        .unwrap();
    assert_eq!(info.tracks.len(), 2);
    assert_eq!(ledger.live(), 2);

    sleep(Duration::from_millis(1200)).await;
    session.stop().await.unwrap();

    assert_eq!(ledger.started(), 2);
    assert_eq!(ledger.stopped(), ledger.started());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_discards_and_releases() {
    let (session, _) = session_with(SyntheticConfig::default());
    let ledger = session.ledger();
    let mut events = session.subscribe();

    session.start(full_hd()).await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert!(session.cancel().await);
    assert_eq!(ledger.stopped(), ledger.started());
    assert!(!session.is_recording().await);
    assert!(!session.cancel().await, "nothing left to cancel");
    assert!(matches!(session.stop().await, Err(CaptureError::NotRecording)));

    assert!(matches!(events.recv().await.unwrap(), SessionEvent::Started { .. }));
    assert!(matches!(events.recv().await.unwrap(), SessionEvent::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_leaves_nothing_running() {
    let session = CaptureSession::new(Box::new(SyntheticBackend::denying()), SessionConfig::default());
    let ledger = session.ledger();

    let err = session.start(full_hd()).await.unwrap_err();
    assert!(matches!(err, CaptureError::PermissionDenied(_)));
    assert_eq!(ledger.started(), 0);
    assert_eq!(ledger.stopped(), 0);
    assert!(!session.is_recording().await);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected() {
    let (session, _) = session_with(SyntheticConfig::default());

    session.start(full_hd()).await.unwrap();
    let err = session.start(full_hd()).await.unwrap_err();
    assert!(matches!(err, CaptureError::AlreadyRecording));

    // The first recording is unaffected
    sleep(Duration::from_millis(1000)).await;
    let media = session.stop().await.unwrap();
    assert_eq!(media.duration_ms(), 1000);
    assert_eq!(session.ledger().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_start_fails_cleanly() {
    let (session, _) = session_with(SyntheticConfig::default());
    assert!(matches!(session.stop().await, Err(CaptureError::NotRecording)));
    assert_eq!(session.ledger().started(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_host_termination_routes_through_stop() {
    let (session, _) = session_with(SyntheticConfig {
        revoke_after: Some(Duration::from_millis(1500)),
        ..SyntheticConfig::default()
    });
    let ledger = session.ledger();
    let mut events = session.subscribe();

    session.start(full_hd()).await.unwrap();

    let (reason, media) = loop {
        match events.recv().await.unwrap() {
            SessionEvent::Terminated { reason, media } => break (reason, media),
            _ => continue,
        }
    };

    assert!(reason.contains("host"));
    assert_eq!(media.duration_ms(), 1500);
    assert!(media.size_bytes() > 0);
    assert!(!session.is_recording().await);
    assert_eq!(ledger.stopped(), ledger.started());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_session_stops_tracks() {
    let (session, _) = session_with(SyntheticConfig::default());
    let ledger = session.ledger();

    session.start(full_hd()).await.unwrap();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(ledger.live(), 1);

    drop(session);
    assert_eq!(ledger.stopped(), ledger.started());
}

#[tokio::test(start_paused = true)]
async fn test_session_can_record_again_after_stop() {
    let (session, _) = session_with(SyntheticConfig::default());

    session.start(full_hd()).await.unwrap();
    sleep(Duration::from_millis(1000)).await;
    session.stop().await.unwrap();

    session.start(full_hd()).await.unwrap();
    sleep(Duration::from_millis(3000)).await;
    let media = session.stop().await.unwrap();

    assert_eq!(media.duration_ms(), 3000);
    assert_eq!(session.ledger().started(), 2);
    assert_eq!(session.ledger().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_terminated_media_is_kept_until_collected() {
    let (session, _) = session_with(SyntheticConfig {
        revoke_after: Some(Duration::from_millis(1000)),
        ..SyntheticConfig::default()
    });

    session.start(full_hd()).await.unwrap();
    sleep(Duration::from_millis(2000)).await;

    assert!(matches!(session.stop().await, Err(CaptureError::NotRecording)));
    let media = session.take_terminated().await.unwrap();
    assert_eq!(media.duration_ms(), 1000);
    assert!(media.size_bytes() > 0);
    assert!(session.take_terminated().await.is_none(), "collected once");
}

#[tokio::test(start_paused = true)]
async fn test_state_readable_while_grant_is_pending() {
    let (session, _) = session_with(SyntheticConfig {
        grant_delay: Duration::from_millis(500),
        ..SyntheticConfig::default()
    });

    let starting = tokio::spawn({
        let session = session.clone();
        async move { session.start(full_hd()).await }
    });
    sleep(Duration::from_millis(10)).await;

    // Resolves before the grant does
    let stats = tokio::time::timeout(Duration::from_millis(50), session.stats())
        .await
        .expect("stats must not wait for the grant");
    assert!(!stats.is_recording);
    assert!(matches!(
        session.start(full_hd()).await,
        Err(CaptureError::AlreadyRecording)
    ));

    starting.await.unwrap().unwrap();
    assert!(session.is_recording().await);
    assert_eq!(session.ledger().started(), 1);

    session.stop().await.unwrap();
    session.start(full_hd()).await.unwrap();
    assert_eq!(session.ledger().started(), 2, "the slot frees up after a start completes");
}
