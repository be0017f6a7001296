//! Trainer lifecycle hooks.
//!
//! The trainer owns a [`CallbackRegistry`] and fires [`TrainerEvent`]s with a
//! snapshot of its state. A session registers four hooks: prime the clocks
//! when training starts, flush metrics at each epoch end, upload the last
//! weights on save, and upload the best weights when training ends.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::training::TrainingSession;
use crate::error::{HubError, Result};

/// Metric key carrying the final mAP score when the trainer does not set one
pub const MAP_METRIC_KEY: &str = "metrics/mAP50-95(B)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainerEvent {
    PretrainRoutineEnd,
    FitEpochEnd,
    ModelSave,
    TrainEnd,
}

impl TrainerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PretrainRoutineEnd => "on_pretrain_routine_end",
            Self::FitEpochEnd => "on_fit_epoch_end",
            Self::ModelSave => "on_model_save",
            Self::TrainEnd => "on_train_end",
        }
    }
}

impl std::fmt::Display for TrainerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the trainer exposes to hooks when an event fires
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainerState {
    pub epoch: u32,
    /// Scalar metrics of the epoch that just ended
    pub metrics: HashMap<String, f64>,
    pub last_weights: Option<PathBuf>,
    pub best_weights: Option<PathBuf>,
    pub fitness: Option<f64>,
    pub best_fitness: Option<f64>,
    /// Final mAP, if the trainer computed one
    pub map_score: Option<f64>,
}

impl TrainerState {
    /// Whether the current epoch produced the best fitness so far
    pub fn is_best(&self) -> bool {
        matches!((self.fitness, self.best_fitness), (Some(f), Some(b)) if f == b)
    }

    /// Explicit score, else the mAP metric, else 0.0
    pub fn final_map(&self) -> f64 {
        self.map_score
            .or_else(|| self.metrics.get(MAP_METRIC_KEY).copied())
            .unwrap_or(0.0)
    }
}

pub type CallbackFuture = BoxFuture<'static, Result<()>>;

/// Hook invoked with an owned copy of the trainer state
pub type Callback = Arc<dyn Fn(TrainerState) -> CallbackFuture + Send + Sync>;

/// Anything that accepts hooks for trainer events
pub trait CallbackRegistry {
    fn add_callback(&mut self, event: TrainerEvent, callback: Callback);
}

/// In-process registry that runs hooks in registration order
#[derive(Default)]
pub struct TrainerCallbacks {
    handlers: HashMap<TrainerEvent, Vec<Callback>>,
}

impl TrainerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, event: TrainerEvent) -> usize {
        self.handlers.get(&event).map_or(0, Vec::len)
    }

    /// Fire `event`. Every hook runs; the first error is returned.
    pub async fn run(&self, event: TrainerEvent, state: &TrainerState) -> Result<()> {
        let Some(handlers) = self.handlers.get(&event) else {
            return Ok(());
        };

        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler(state.clone()).await {
                warn!(event = %event, "Trainer callback failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl CallbackRegistry for TrainerCallbacks {
    fn add_callback(&mut self, event: TrainerEvent, callback: Callback) {
        self.handlers.entry(event).or_default().push(callback);
    }
}

impl TrainingSession {
    /// Attach this session's hooks to a trainer.
    pub fn register_callbacks(self: &Arc<Self>, registry: &mut dyn CallbackRegistry) {
        let session = Arc::clone(self);
        registry.add_callback(
            TrainerEvent::PretrainRoutineEnd,
            Arc::new(move |_state: TrainerState| -> CallbackFuture {
                let session = session.clone();
                Box::pin(async move {
                    session.on_pretrain_routine_end();
                    Ok(())
                })
            }),
        );

        let session = Arc::clone(self);
        registry.add_callback(
            TrainerEvent::FitEpochEnd,
            Arc::new(move |state: TrainerState| -> CallbackFuture {
                let session = session.clone();
                Box::pin(async move { session.on_fit_epoch_end(state).await })
            }),
        );

        let session = Arc::clone(self);
        registry.add_callback(
            TrainerEvent::ModelSave,
            Arc::new(move |state: TrainerState| -> CallbackFuture {
                let session = session.clone();
                Box::pin(async move { session.on_model_save(state).await })
            }),
        );

        let session = Arc::clone(self);
        registry.add_callback(
            TrainerEvent::TrainEnd,
            Arc::new(move |state: TrainerState| -> CallbackFuture {
                let session = session.clone();
                Box::pin(async move { session.on_train_end(state).await })
            }),
        );
    }

    fn on_pretrain_routine_end(&self) {
        info!(model_id = %self.model_id(), "View model at {}", self.model_url());
        self.start_training_clock();
    }

    async fn on_fit_epoch_end(&self, state: TrainerState) -> Result<()> {
        self.queue_metrics(state.metrics).await;
        self.maybe_upload_metrics().await;
        Ok(())
    }

    async fn on_model_save(&self, state: TrainerState) -> Result<()> {
        let Some(weights) = state.last_weights.as_deref() else {
            warn!(epoch = state.epoch, "Model saved without a weights path, nothing to upload");
            return Ok(());
        };
        self.upload_checkpoint(state.epoch, weights, state.is_best(), false, 0.0)
            .await?;
        Ok(())
    }

    async fn on_train_end(&self, state: TrainerState) -> Result<()> {
        let result = match state.best_weights.as_deref().or(state.last_weights.as_deref()) {
            Some(weights) => self
                .upload_checkpoint(state.epoch, weights, true, true, state.final_map())
                .await
                .map(|_| ()),
            None => Err(HubError::FinalUploadFailed {
                epoch: state.epoch,
                source: Box::new(HubError::Validation(
                    "training ended without a weights file".to_string(),
                )),
            }),
        };

        self.shutdown();
        info!(model_id = %self.model_id(), "View model at {}", self.model_url());
        result
    }
}
