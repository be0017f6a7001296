//! Background liveness announcements to the hub.
//!
//! The loop polls the session's `alive` flag once per iteration and never
//! interrupts its own sleep: after shutdown is requested, the loop exits at the
//! top of the next iteration.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::model::HubEndpoints;
use super::rate_limit::{Channel, RateLimiter};
use crate::error::Result;
use crate::transport::{CallKind, CallProfile, HubRequest, HubResponse, RetryingTransport};

/// Lifecycle of the heartbeat task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Starting,
    Running,
    Stopped,
}

impl std::fmt::Display for HeartbeatState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeartbeatState::Starting => write!(f, "starting"),
            HeartbeatState::Running => write!(f, "running"),
            HeartbeatState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot published by the loop after every iteration
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatStatus {
    pub state: HeartbeatState,
    /// Identifier assigned by the hub to this process
    pub agent_id: Option<String>,
    /// Successful heartbeats so far
    pub beats: u64,
    pub consecutive_failures: u32,
    pub last_beat_at: Option<DateTime<Utc>>,
}

impl Default for HeartbeatStatus {
    fn default() -> Self {
        Self {
            state: HeartbeatState::Starting,
            agent_id: None,
            beats: 0,
            consecutive_failures: 0,
            last_beat_at: None,
        }
    }
}

/// Extract `data.agentId` from a heartbeat response.
fn parse_agent_id(resp: &HubResponse) -> Option<String> {
    let body: Value = resp.json().ok()?;
    match body.get("data")?.get("agentId")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Periodic heartbeat task for one model
pub struct HeartbeatLoop {
    transport: RetryingTransport,
    limiter: Arc<RateLimiter>,
    profile: CallProfile,
    url: String,
    headers: HeaderMap,
    agent_name: String,
    alive: Arc<AtomicBool>,
}

impl HeartbeatLoop {
    pub fn new(
        transport: RetryingTransport,
        limiter: Arc<RateLimiter>,
        profile: CallProfile,
        endpoints: &HubEndpoints,
        headers: HeaderMap,
        agent_name: String,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            limiter,
            profile,
            url: endpoints.heartbeat(),
            headers,
            agent_name,
            alive,
        }
    }

    fn interval(&self) -> Duration {
        self.limiter.interval(Channel::Heartbeat)
    }

    /// Start the loop on the current tokio runtime.
    pub fn spawn(self) -> HeartbeatHandle {
        let (status_tx, status_rx) = watch::channel(HeartbeatStatus::default());
        let task = tokio::spawn(self.run(status_tx));
        HeartbeatHandle {
            status: status_rx,
            task,
        }
    }

    async fn run(self, status: watch::Sender<HeartbeatStatus>) {
        let interval = self.interval();
        let mut agent_id: Option<String> = None;

        status.send_modify(|s| s.state = HeartbeatState::Running);
        info!(url = %self.url, ?interval, "Heartbeat loop started");

        while self.alive.load(Ordering::SeqCst) {
            if self.limiter.allow(Channel::Heartbeat) {
                match self.beat(agent_id.as_deref()).await {
                    Ok(assigned) => {
                        if let Some(id) = assigned {
                            if agent_id.as_deref() != Some(id.as_str()) {
                                info!(agent_id = %id, "Hub assigned agent id");
                            }
                            agent_id = Some(id);
                        }
                        status.send_modify(|s| {
                            s.agent_id = agent_id.clone();
                            s.beats += 1;
                            s.consecutive_failures = 0;
                            s.last_beat_at = Some(Utc::now());
                        });
                    }
                    Err(e) => {
                        status.send_modify(|s| s.consecutive_failures += 1);
                        warn!("Heartbeat failed, next attempt in {:?}: {}", interval, e);
                    }
                }
            } else {
                debug!("Heartbeat skipped by rate limiter");
            }

            tokio::time::sleep(interval).await;
        }

        status.send_modify(|s| s.state = HeartbeatState::Stopped);
        info!(url = %self.url, "Heartbeat loop stopped");
    }

    async fn beat(&self, agent_id: Option<&str>) -> Result<Option<String>> {
        let request = HubRequest::post(self.url.as_str())
            .with_headers(self.headers.clone())
            .with_json(json!({
                "agent": self.agent_name,
                "agentId": agent_id,
            }));

        let resp = self
            .transport
            .send(request, CallKind::Heartbeat, &self.profile)
            .await?;
        Ok(parse_agent_id(&resp))
    }
}

/// Observer side of a spawned heartbeat loop.
///
/// Dropping the handle detaches the task; it keeps running until the session's
/// `alive` flag is cleared.
pub struct HeartbeatHandle {
    status: watch::Receiver<HeartbeatStatus>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn status(&self) -> HeartbeatStatus {
        self.status.borrow().clone()
    }

    pub fn agent_id(&self) -> Option<String> {
        self.status.borrow().agent_id.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Receiver for status changes
    pub fn subscribe(&self) -> watch::Receiver<HeartbeatStatus> {
        self.status.clone()
    }
}
