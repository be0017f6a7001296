mod common;

use common::{json_body, multipart, test_config, Route, ScriptedTransport, MODEL_ID};
use hubsync::session::MAP_METRIC_KEY;
use hubsync::{HubAuth, HubError, TrainerCallbacks, TrainerEvent, TrainerState, TrainingSession};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn epoch_state(epoch: u32, dir: &std::path::Path, loss: f64, map: f64) -> TrainerState {
    TrainerState {
        epoch,
        metrics: HashMap::from([
            ("train/loss".to_string(), loss),
            (MAP_METRIC_KEY.to_string(), map),
        ]),
        last_weights: Some(dir.join("last.pt")),
        best_weights: Some(dir.join("best.pt")),
        fitness: Some(0.5),
        best_fitness: Some(0.5),
        map_score: None,
    }
}

/// A short training run driven through the registered hooks.
#[tokio::test(start_paused = true)]
async fn training_run_through_callbacks() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("last.pt"), b"last-weights").unwrap();
    std::fs::write(dir.path().join("best.pt"), b"best-weights!").unwrap();

    let mut config = test_config();
    config.rate_limits.metrics_secs = 1.0;
    config.rate_limits.checkpoint_secs = 60.0;

    let hub = ScriptedTransport::new().shared();
    let session = Arc::new(
        TrainingSession::connect(config, MODEL_ID, &HubAuth::api_key("k").unwrap(), hub.clone())
            .await
            .unwrap(),
    );

    let mut callbacks = TrainerCallbacks::new();
    session.register_callbacks(&mut callbacks);
    for event in [
        TrainerEvent::PretrainRoutineEnd,
        TrainerEvent::FitEpochEnd,
        TrainerEvent::ModelSave,
        TrainerEvent::TrainEnd,
    ] {
        assert_eq!(callbacks.count(event), 1);
    }

    callbacks
        .run(TrainerEvent::PretrainRoutineEnd, &TrainerState::default())
        .await
        .unwrap();

    // Epoch 0 ends right after the clocks were primed: nothing leaves yet.
    let state = epoch_state(0, dir.path(), 1.5, 0.3);
    callbacks.run(TrainerEvent::FitEpochEnd, &state).await.unwrap();
    callbacks.run(TrainerEvent::ModelSave, &state).await.unwrap();
    assert_eq!(hub.count(Route::Metrics), 0);
    assert_eq!(hub.count(Route::Upload), 0);
    assert_eq!(session.pending_metrics().await, 2);

    // Epoch 1 ends after both intervals elapsed.
    tokio::time::sleep(Duration::from_secs(61)).await;
    let state = epoch_state(1, dir.path(), 1.2, 0.38);
    callbacks.run(TrainerEvent::FitEpochEnd, &state).await.unwrap();
    callbacks.run(TrainerEvent::ModelSave, &state).await.unwrap();

    let metrics = hub.requests_to(Route::Metrics);
    assert_eq!(metrics.len(), 1);
    assert_eq!(json_body(&metrics[0])["metrics"]["train/loss"], 1.2);

    let uploads = hub.requests_to(Route::Upload);
    assert_eq!(uploads.len(), 1);
    let (fields, file, _) = multipart(&uploads[0]);
    assert_eq!(fields["epoch"], "1");
    assert_eq!(fields["isBest"], "true");
    assert_eq!(file, "last.pt");

    // Training ends: final upload of best.pt with the mAP metric, then shutdown.
    let state = epoch_state(2, dir.path(), 1.0, 0.42);
    callbacks.run(TrainerEvent::TrainEnd, &state).await.unwrap();

    let uploads = hub.requests_to(Route::Upload);
    assert_eq!(uploads.len(), 2);
    let (fields, file, len) = multipart(&uploads[1]);
    assert_eq!(fields["type"], "final");
    assert_eq!(fields["map"], "0.42");
    assert_eq!((file.as_str(), len), ("best.pt", 13));
    assert!(!session.is_alive());
}

/// A failed final upload reaches the trainer, and the session still shuts down.
#[tokio::test(start_paused = true)]
async fn train_end_surfaces_final_upload_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("best.pt"), b"w").unwrap();

    let mut config = test_config();
    config.transport.final_checkpoint.retries = 1;

    let hub = ScriptedTransport::new()
        .on(Route::Upload, |_| common::status(502))
        .shared();
    let session = Arc::new(
        TrainingSession::connect(config, MODEL_ID, &HubAuth::api_key("k").unwrap(), hub.clone())
            .await
            .unwrap(),
    );

    let mut callbacks = TrainerCallbacks::new();
    session.register_callbacks(&mut callbacks);

    let state = TrainerState {
        epoch: 9,
        best_weights: Some(dir.path().join("best.pt")),
        map_score: Some(0.7),
        ..Default::default()
    };
    let err = callbacks
        .run(TrainerEvent::TrainEnd, &state)
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::FinalUploadFailed { epoch: 9, .. }), "{err:?}");
    assert_eq!(hub.count(Route::Upload), 2);
    assert!(!session.is_alive());
}
