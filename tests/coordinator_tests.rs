// Integration tests for the conversion coordinator
//
// Most tests drive a real engine thread with a scripted codec, so they run
// on real time: the engine has its own runtime and clock.

mod common;

use common::{coordinator, webm_source, ProgressLog, Script, ScriptedLoader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use typecast::transcode::{ProgressStage, WireResult};
use typecast::{
    ConversionCoordinator, ConversionError, ConversionOptions, ConversionOutcome, ConversionProgress,
    CoordinatorConfig, CoordinatorState, EngineHandle, EngineRequest, EngineResponse, OutputFormat,
};

const PATIENCE: Duration = Duration::from_secs(5);

fn mp4() -> ConversionOptions {
    ConversionOptions {
        format: OutputFormat::Mp4,
        ..ConversionOptions::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(PATIENCE, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Coordinator wired to channels the test plays the engine on
fn fake_engine(
    cancel_ack_timeout: Duration,
) -> (
    ConversionCoordinator,
    mpsc::UnboundedReceiver<EngineRequest>,
    mpsc::UnboundedSender<EngineResponse>,
) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let handle = EngineHandle::from_channels(request_tx, response_rx, ScriptedLoader::new(Script::default()));
    let coordinator = ConversionCoordinator::new(handle, CoordinatorConfig { cancel_ack_timeout });
    (coordinator, request_rx, response_tx)
}

#[tokio::test]
async fn test_conversion_reports_progress_and_result() {
    let (_, coordinator) = coordinator(Script::default(), PATIENCE);
    let log = ProgressLog::default();

    let outcome = coordinator.convert(webm_source(), mp4(), log.callback()).await.unwrap();
    let ConversionOutcome::Completed(result) = outcome else {
        panic!("conversion was not completed");
    };

    assert_eq!(result.mime_type, "video/mp4");
    assert!(result.buffer.starts_with(b"converted:"));
    assert_eq!(result.size_bytes, result.buffer.len() as u64);

    let entries = log.entries();
    assert_eq!(entries.first().map(|p| p.stage), Some(ProgressStage::Loading));
    assert_eq!(entries.last().map(|p| p.stage), Some(ProgressStage::Finalizing));
    assert_eq!(entries.last().map(|p| p.percent), Some(100));
    assert!(entries.iter().any(|p| p.stage == ProgressStage::Converting));

    let percents = log.percents();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", percents);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn test_output_mime_follows_requested_format() {
    let (_, coordinator) = coordinator(Script::default(), PATIENCE);

    for format in [OutputFormat::Webm, OutputFormat::Gif, OutputFormat::Ts] {
        let options = ConversionOptions {
            format,
            ..ConversionOptions::default()
        };
        match coordinator.convert(webm_source(), options, |_| {}).await.unwrap() {
            ConversionOutcome::Completed(result) => assert_eq!(result.mime_type, format.mime_type()),
            ConversionOutcome::Cancelled => panic!("{:?} was cancelled", format),
        }
    }
}

#[tokio::test]
async fn test_second_conversion_is_rejected_while_first_runs() {
    let (_, coordinator) = coordinator(
        Script {
            step_delay: Duration::from_millis(40),
            ..Script::default()
        },
        PATIENCE,
    );
    let coordinator = Arc::new(coordinator);

    let first = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.convert(webm_source(), mp4(), |_| {}).await })
    };
    wait_until(|| coordinator.state() == CoordinatorState::Converting).await;

    let second = coordinator.convert(webm_source(), mp4(), |_| {}).await;
    assert_eq!(second.unwrap_err(), ConversionError::ConversionInProgress);

    let first = timeout(PATIENCE, first).await.unwrap().unwrap();
    assert!(matches!(first, Ok(ConversionOutcome::Completed(_))), "first conversion is unaffected");
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn test_cancel_during_load_resolves_cancelled() {
    let (_, coordinator) = coordinator(
        Script {
            load_delays: vec![Duration::from_millis(500), Duration::ZERO],
            ..Script::default()
        },
        PATIENCE,
    );
    let coordinator = Arc::new(coordinator);
    let log = ProgressLog::default();

    let pending = {
        let coordinator = Arc::clone(&coordinator);
        let callback = log.callback();
        tokio::spawn(async move { coordinator.convert(webm_source(), mp4(), callback).await })
    };
    wait_until(|| coordinator.state() == CoordinatorState::Converting).await;

    assert!(coordinator.cancel());
    assert_eq!(coordinator.state(), CoordinatorState::Idle, "idle as soon as cancel returns");

    let outcome = timeout(PATIENCE, pending).await.unwrap().unwrap();
    assert!(matches!(outcome, Ok(ConversionOutcome::Cancelled)));
    assert!(log.entries().iter().all(|p| p.stage == ProgressStage::Loading));

    // The engine was torn down; the next conversion starts clean
    let next = coordinator.convert(webm_source(), mp4(), |_| {}).await;
    assert!(matches!(next, Ok(ConversionOutcome::Completed(_))));
}

#[tokio::test]
async fn test_cancel_mid_conversion_forces_reload() {
    let (loader, coordinator) = coordinator(
        Script {
            steps: vec![10, 20, 30, 40, 50, 60, 70, 80, 90],
            step_delay: Duration::from_millis(50),
            ..Script::default()
        },
        PATIENCE,
    );
    let coordinator = Arc::new(coordinator);
    let log = ProgressLog::default();

    let pending = {
        let coordinator = Arc::clone(&coordinator);
        let callback = log.callback();
        tokio::spawn(async move { coordinator.convert(webm_source(), mp4(), callback).await })
    };
    wait_until(|| log.entries().iter().any(|p| p.stage == ProgressStage::Converting)).await;

    assert!(coordinator.cancel());
    let outcome = timeout(PATIENCE, pending).await.unwrap().unwrap();
    assert!(matches!(outcome, Ok(ConversionOutcome::Cancelled)));

    let seen = log.entries().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(log.entries().len(), seen, "no progress after cancel");
    assert_eq!(loader.loads(), 1);

    let next = coordinator.convert(webm_source(), mp4(), |_| {}).await;
    assert!(matches!(next, Ok(ConversionOutcome::Completed(_))));
    assert_eq!(loader.loads(), 2, "cancel discards the loaded codec");
}

#[tokio::test]
async fn test_cancel_when_idle_is_a_noop() {
    let (_, coordinator) = coordinator(Script::default(), PATIENCE);
    assert!(!coordinator.cancel());
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn test_load_timeout_is_reported_and_retry_succeeds() {
    let (loader, coordinator) = coordinator(
        Script {
            load_delays: vec![Duration::from_millis(600), Duration::ZERO],
            ..Script::default()
        },
        Duration::from_millis(100),
    );

    let first = coordinator.convert(webm_source(), mp4(), |_| {}).await;
    assert_eq!(first.unwrap_err(), ConversionError::EngineLoadTimeout);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);

    let retry = coordinator.convert(webm_source(), mp4(), |_| {}).await;
    assert!(matches!(retry, Ok(ConversionOutcome::Completed(_))));
    assert_eq!(loader.loads(), 2);
}

#[tokio::test]
async fn test_load_failure_is_reported() {
    let (_, coordinator) = coordinator(
        Script {
            fail_load: true,
            ..Script::default()
        },
        PATIENCE,
    );

    let err = coordinator.convert(webm_source(), mp4(), |_| {}).await.unwrap_err();
    assert!(matches!(err, ConversionError::EngineLoadFailed(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_codec_failure_is_transcode_failed() {
    let (_, coordinator) = coordinator(
        Script {
            fail_with: Some("corrupt input".to_string()),
            ..Script::default()
        },
        PATIENCE,
    );

    match coordinator.convert(webm_source(), mp4(), |_| {}).await {
        Err(ConversionError::TranscodeFailed(message)) => assert!(message.contains("corrupt input")),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }

    // A failure does not wedge the coordinator
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn test_invalid_options_never_reach_the_engine() {
    let (loader, coordinator) = coordinator(Script::default(), PATIENCE);
    let options = ConversionOptions {
        quality_level: 90,
        ..ConversionOptions::default()
    };

    let err = coordinator.convert(webm_source(), options, |_| {}).await.unwrap_err();
    assert!(matches!(err, ConversionError::InvalidOptions(_)));
    assert_eq!(loader.loads(), 0);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn test_preload_then_convert_loads_once() {
    let (loader, coordinator) = coordinator(Script::default(), PATIENCE);
    assert!(coordinator.is_available().await);

    coordinator.preload().await.unwrap();
    coordinator.preload().await.unwrap();
    assert_eq!(loader.loads(), 1);

    let log = ProgressLog::default();
    let outcome = coordinator.convert(webm_source(), mp4(), log.callback()).await;
    assert!(matches!(outcome, Ok(ConversionOutcome::Completed(_))));
    assert_eq!(loader.loads(), 1);
    assert!(log.entries().iter().all(|p| p.stage != ProgressStage::Loading));
}

#[tokio::test]
async fn test_stale_and_backwards_messages_are_dropped() {
    let (coordinator, mut requests, responses) = fake_engine(PATIENCE);
    let coordinator = Arc::new(coordinator);
    let log = ProgressLog::default();

    let pending = {
        let coordinator = Arc::clone(&coordinator);
        let callback = log.callback();
        tokio::spawn(async move { coordinator.convert(webm_source(), mp4(), callback).await })
    };

    let id = match requests.recv().await.unwrap() {
        EngineRequest::Convert { id, .. } => id,
        other => panic!("unexpected {:?}", other),
    };

    let progress = |id: &str, percent| EngineResponse::progress(id, ConversionProgress::converting(percent));
    let success = |id: &str, data: &[u8]| EngineResponse::Success {
        id: id.to_string(),
        result: WireResult {
            data: data.to_vec(),
            mime_type: "video/mp4".to_string(),
            size_bytes: data.len() as u64,
            elapsed_ms: 5,
        },
    };

    responses.send(progress("old-conversion", 90)).unwrap();
    responses.send(progress(&id, 40)).unwrap();
    responses.send(progress(&id, 20)).unwrap();
    responses.send(progress(&id, 60)).unwrap();
    responses.send(success("old-conversion", b"stale")).unwrap();
    responses.send(success(&id, b"fresh")).unwrap();

    let outcome = timeout(PATIENCE, pending).await.unwrap().unwrap().unwrap();
    match outcome {
        ConversionOutcome::Completed(result) => assert_eq!(result.buffer, b"fresh"),
        ConversionOutcome::Cancelled => panic!("not cancelled"),
    }
    assert_eq!(log.percents(), vec![40, 60]);
}

#[tokio::test]
async fn test_messages_for_cancelled_conversion_are_ignored() {
    let (coordinator, mut requests, responses) = fake_engine(PATIENCE);
    let coordinator = Arc::new(coordinator);
    let log = ProgressLog::default();

    let pending = {
        let coordinator = Arc::clone(&coordinator);
        let callback = log.callback();
        tokio::spawn(async move { coordinator.convert(webm_source(), mp4(), callback).await })
    };
    let convert_id = match requests.recv().await.unwrap() {
        EngineRequest::Convert { id, .. } => id,
        other => panic!("unexpected {:?}", other),
    };

    assert!(coordinator.cancel());
    let cancel_id = match requests.recv().await.unwrap() {
        EngineRequest::Cancel { id } => id,
        other => panic!("unexpected {:?}", other),
    };
    assert_ne!(cancel_id, convert_id, "cancel carries its own id");

    // Late traffic from the superseded conversion
    responses
        .send(EngineResponse::progress(convert_id.clone(), ConversionProgress::converting(70)))
        .unwrap();
    responses.send(EngineResponse::Cancelled { id: cancel_id }).unwrap();

    let outcome = timeout(PATIENCE, pending).await.unwrap().unwrap();
    assert!(matches!(outcome, Ok(ConversionOutcome::Cancelled)));
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn test_cancel_resolves_after_ack_timeout() {
    let (coordinator, mut requests, _responses) = fake_engine(Duration::from_millis(100));
    let coordinator = Arc::new(coordinator);

    let pending = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.convert(webm_source(), mp4(), |_| {}).await })
    };
    assert!(matches!(requests.recv().await, Some(EngineRequest::Convert { .. })));

    // The engine never confirms teardown
    assert!(coordinator.cancel());
    let outcome = timeout(PATIENCE, pending).await.unwrap().unwrap();
    assert!(matches!(outcome, Ok(ConversionOutcome::Cancelled)));
}

#[tokio::test]
async fn test_engine_exit_resolves_pending_conversion() {
    let (coordinator, mut requests, responses) = fake_engine(PATIENCE);
    let coordinator = Arc::new(coordinator);

    let pending = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.convert(webm_source(), mp4(), |_| {}).await })
    };
    assert!(matches!(requests.recv().await, Some(EngineRequest::Convert { .. })));

    drop(responses);
    drop(requests);

    let outcome = timeout(PATIENCE, pending).await.unwrap().unwrap();
    assert_eq!(outcome.unwrap_err(), ConversionError::EngineUnavailable);
    assert!(!coordinator.is_available().await);
}

#[tokio::test]
async fn test_unavailable_engine_rejects_conversions() {
    let (coordinator, requests, _responses) = fake_engine(PATIENCE);
    drop(requests);

    assert!(!coordinator.is_available().await);
    let err = coordinator.convert(webm_source(), mp4(), |_| {}).await.unwrap_err();
    assert_eq!(err, ConversionError::EngineUnavailable);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert_eq!(coordinator.preload().await.unwrap_err(), ConversionError::EngineUnavailable);
}
