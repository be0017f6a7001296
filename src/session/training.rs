//! Trainer-facing session: model identity, rate limits, metrics queue and the
//! heartbeat loop for one training run.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::heartbeat::{HeartbeatHandle, HeartbeatLoop, HeartbeatStatus};
use super::metrics_queue::MetricsQueue;
use super::model::{HubEndpoints, HubModel};
use super::rate_limit::{Channel, RateLimiter};
use crate::auth::HubAuth;
use crate::config::HubConfig;
use crate::disk::{self, DiskProbe, StatvfsProbe};
use crate::error::{HubError, Result};
use crate::transport::{CallKind, FilePart, HubRequest, HubTransport, RetryingTransport};

/// Result of a `maybe_upload_metrics` call
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsFlush {
    /// Metrics channel still inside its interval; nothing sent
    RateLimited,
    /// Hub confirmed this many metrics
    Uploaded(usize),
    /// Send failed; the queue is kept for the next flush
    Failed(String),
}

/// Result of a checkpoint upload that did not raise
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointOutcome {
    /// Checkpoint channel still inside its interval; nothing sent
    RateLimited,
    Uploaded { bytes: usize },
    /// Non-final upload failed; training may continue
    Failed(String),
}

/// Synchronizer between one training process and the hub.
///
/// Construct with [`TrainingSession::connect`]; the heartbeat loop runs from
/// then until [`TrainingSession::shutdown`] or drop.
pub struct TrainingSession {
    config: HubConfig,
    model: HubModel,
    endpoints: HubEndpoints,
    headers: HeaderMap,
    transport: RetryingTransport,
    limiter: Arc<RateLimiter>,
    metrics: Mutex<MetricsQueue>,
    alive: Arc<AtomicBool>,
    heartbeat: HeartbeatHandle,
}

impl TrainingSession {
    /// Fetch the model record and start heartbeats.
    ///
    /// The configuration is validated first. Nothing is spawned unless the model
    /// is found and its dataset is ready.
    pub async fn connect(
        config: HubConfig,
        model_id: &str,
        auth: &HubAuth,
        transport: Arc<dyn HubTransport>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| HubError::Validation(errors.join("; ")))?;
        let headers = auth.headers()?;
        let transport = RetryingTransport::new(transport);
        let endpoints = HubEndpoints::new(&config.hub, model_id);

        let model = Self::fetch_model(&config, &transport, &endpoints, &headers).await?;
        let endpoints = endpoints.for_model(&model.id);

        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limits));
        let alive = Arc::new(AtomicBool::new(true));

        let heartbeat = HeartbeatLoop::new(
            transport.clone(),
            limiter.clone(),
            config.transport.profile(CallKind::Heartbeat),
            &endpoints,
            headers.clone(),
            config.hub.agent_name(),
            alive.clone(),
        )
        .spawn();

        info!(model_id = %model.id, "Hub training session started");

        Ok(Self {
            config,
            model,
            endpoints,
            headers,
            transport,
            limiter,
            metrics: Mutex::new(MetricsQueue::new()),
            alive,
            heartbeat,
        })
    }

    async fn fetch_model(
        config: &HubConfig,
        transport: &RetryingTransport,
        endpoints: &HubEndpoints,
        headers: &HeaderMap,
    ) -> Result<HubModel> {
        let request = HubRequest::get(endpoints.model()).with_headers(headers.clone());
        let profile = config.transport.profile(CallKind::FetchModel);

        let resp = match transport.send(request, CallKind::FetchModel, &profile).await {
            Ok(resp) => resp,
            Err(e) if e.is_unreachable() => {
                error!("Hub is not reachable: {}", e);
                return Err(HubError::ServiceUnavailable(format!(
                    "{} is not online, please try again later ({})",
                    config.hub.api_root(),
                    e
                )));
            }
            Err(e) => return Err(e),
        };

        let body: serde_json::Value = resp.json()?;
        HubModel::from_response(endpoints.model_id(), &body)
    }

    pub fn model_id(&self) -> &str {
        &self.model.id
    }

    pub fn model(&self) -> &HubModel {
        &self.model
    }

    /// Web page for this model on the hub
    pub fn model_url(&self) -> String {
        self.endpoints.web_page()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Agent id assigned by the hub, once the first heartbeat succeeded
    pub fn agent_id(&self) -> Option<String> {
        self.heartbeat.agent_id()
    }

    pub fn heartbeat_status(&self) -> HeartbeatStatus {
        self.heartbeat.status()
    }

    pub fn heartbeat(&self) -> &HeartbeatHandle {
        &self.heartbeat
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Start the metrics and checkpoint intervals from now.
    pub fn start_training_clock(&self) {
        self.limiter.prime(Channel::Metrics);
        self.limiter.prime(Channel::Checkpoint);
    }

    /// Fail if the data directory cannot hold the dataset.
    pub async fn check_disk_space(&self) -> Result<()> {
        self.check_disk_space_with(&StatvfsProbe).await
    }

    pub async fn check_disk_space_with(&self, probe: &dyn DiskProbe) -> Result<()> {
        let Some(dataset_bytes) = self.dataset_size().await else {
            warn!(
                model_id = %self.model.id,
                "Dataset size unknown, skipping disk space check"
            );
            return Ok(());
        };

        disk::ensure_space(
            probe,
            &self.config.disk.path,
            dataset_bytes,
            self.config.disk.safety_factor,
        )
    }

    async fn dataset_size(&self) -> Option<u64> {
        let dataset = &self.model.dataset;
        if let Some(size) = dataset.size {
            return Some(size);
        }

        let url = dataset.url.as_deref()?;
        let profile = self.config.transport.profile(CallKind::DatasetProbe);
        match self
            .transport
            .send(HubRequest::head(url), CallKind::DatasetProbe, &profile)
            .await
        {
            Ok(resp) => resp.content_length(),
            Err(e) => {
                warn!("Could not determine dataset size from {}: {}", url, e);
                None
            }
        }
    }

    /// Merge metric values into the pending queue. No network.
    pub async fn queue_metrics<I, K>(&self, values: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        self.metrics.lock().await.extend(values);
    }

    /// Number of metrics waiting for upload
    pub async fn pending_metrics(&self) -> usize {
        self.metrics.lock().await.len()
    }

    /// Upload queued metrics if the metrics interval has elapsed.
    ///
    /// Never fails: a failed send keeps the queue for the next call.
    pub async fn maybe_upload_metrics(&self) -> MetricsFlush {
        if !self.limiter.allow(Channel::Metrics) {
            return MetricsFlush::RateLimited;
        }

        // Lock is released before the send so the trainer can keep queueing.
        let snapshot = self.metrics.lock().await.snapshot();

        let request = HubRequest::post(self.endpoints.model())
            .with_headers(self.headers.clone())
            .with_json(json!({
                "metrics": snapshot.values(),
                "type": "metrics",
            }));
        let profile = self.config.transport.profile(CallKind::UploadMetrics);

        match self
            .transport
            .send(request, CallKind::UploadMetrics, &profile)
            .await
        {
            Ok(_) => {
                self.metrics.lock().await.clear(&snapshot);
                debug!(count = snapshot.len(), "Metrics uploaded");
                MetricsFlush::Uploaded(snapshot.len())
            }
            Err(e) => {
                warn!("Metrics upload failed, keeping {} queued: {}", snapshot.len(), e);
                MetricsFlush::Failed(e.to_string())
            }
        }
    }

    /// Upload a checkpoint.
    ///
    /// Epoch checkpoints (`final_ == false`) are rate limited and their failures
    /// are reported through [`CheckpointOutcome::Failed`]. The final checkpoint
    /// always fires, uses the final retry budget, and a failure is returned as
    /// [`HubError::FinalUploadFailed`].
    pub async fn upload_checkpoint(
        &self,
        epoch: u32,
        weights: &Path,
        is_best: bool,
        final_: bool,
        map_score: f64,
    ) -> Result<CheckpointOutcome> {
        if final_ {
            info!(model_id = %self.model.id, epoch, "Uploading final checkpoint");
            return match self.send_checkpoint(epoch, weights, is_best, true, map_score).await {
                Ok(bytes) => {
                    info!(model_id = %self.model.id, bytes, "Final checkpoint uploaded");
                    Ok(CheckpointOutcome::Uploaded { bytes })
                }
                Err(e) => {
                    error!(model_id = %self.model.id, epoch, "Final checkpoint upload failed: {}", e);
                    Err(HubError::FinalUploadFailed {
                        epoch,
                        source: Box::new(e),
                    })
                }
            };
        }

        if !self.limiter.allow(Channel::Checkpoint) {
            debug!(epoch, "Checkpoint upload skipped by rate limiter");
            return Ok(CheckpointOutcome::RateLimited);
        }

        info!(model_id = %self.model.id, epoch, is_best, "Uploading checkpoint");
        match self.send_checkpoint(epoch, weights, is_best, false, map_score).await {
            Ok(bytes) => Ok(CheckpointOutcome::Uploaded { bytes }),
            Err(e) => {
                warn!(epoch, "Checkpoint upload failed, training continues: {}", e);
                Ok(CheckpointOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn send_checkpoint(
        &self,
        epoch: u32,
        weights: &Path,
        is_best: bool,
        final_: bool,
        map_score: f64,
    ) -> Result<usize> {
        let bytes = Bytes::from(tokio::fs::read(weights).await?);
        let len = bytes.len();

        let (call, fields, file_name) = if final_ {
            (
                CallKind::UploadFinal,
                vec![
                    ("epoch".to_string(), epoch.to_string()),
                    ("type".to_string(), "final".to_string()),
                    ("map".to_string(), map_score.to_string()),
                ],
                "best.pt",
            )
        } else {
            (
                CallKind::UploadEpoch,
                vec![
                    ("epoch".to_string(), epoch.to_string()),
                    ("type".to_string(), "epoch".to_string()),
                    ("isBest".to_string(), is_best.to_string()),
                ],
                "last.pt",
            )
        };

        let request = HubRequest::post(self.endpoints.upload())
            .with_headers(self.headers.clone())
            .with_multipart(
                fields,
                FilePart {
                    name: file_name.to_string(),
                    bytes,
                },
            );
        let profile = self.config.transport.profile(call);

        self.transport.send(request, call, &profile).await?;
        Ok(len)
    }

    /// Stop the heartbeat loop after its current sleep. Does not wait for it.
    pub fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            info!(model_id = %self.model.id, "Hub training session shut down");
        }
    }

    /// Values currently queued, for diagnostics
    pub async fn queued_metrics(&self) -> HashMap<String, f64> {
        self.metrics.lock().await.snapshot().values()
    }
}

impl Drop for TrainingSession {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}
