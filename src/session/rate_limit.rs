//! Per-channel minimum-interval gate.

use dashmap::DashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;

/// Logical traffic channel with its own interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Metrics,
    Checkpoint,
    Heartbeat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Checkpoint => "checkpoint",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Channel {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "metrics" => Ok(Self::Metrics),
            "checkpoint" | "ckpt" => Ok(Self::Checkpoint),
            "heartbeat" => Ok(Self::Heartbeat),
            _ => Err("invalid channel; expected metrics|checkpoint|heartbeat"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Gate {
    min_interval: Duration,
    last_fired_at: Option<Instant>,
}

/// Minimum-interval gate per channel.
///
/// Each channel's state sits in its own map shard entry, so the heartbeat task
/// and the trainer can call into the same limiter without a global lock.
#[derive(Debug)]
pub struct RateLimiter {
    gates: DashMap<Channel, Gate>,
}

impl RateLimiter {
    pub fn new(metrics: Duration, checkpoint: Duration, heartbeat: Duration) -> Self {
        let gates = DashMap::new();
        for (channel, min_interval) in [
            (Channel::Metrics, metrics),
            (Channel::Checkpoint, checkpoint),
            (Channel::Heartbeat, heartbeat),
        ] {
            gates.insert(
                channel,
                Gate {
                    min_interval,
                    last_fired_at: None,
                },
            );
        }
        Self { gates }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.metrics(), config.checkpoint(), config.heartbeat())
    }

    /// Fire `channel` now if its interval has elapsed.
    pub fn allow(&self, channel: Channel) -> bool {
        self.allow_at(channel, Instant::now())
    }

    /// Fire `channel` at `now` if it never fired or `min_interval` has elapsed.
    pub fn allow_at(&self, channel: Channel, now: Instant) -> bool {
        let Some(mut gate) = self.gates.get_mut(&channel) else {
            return true;
        };

        let allowed = match gate.last_fired_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= gate.min_interval,
        };

        if allowed {
            gate.last_fired_at = Some(now);
        }
        trace!(channel = %channel, allowed, "rate limit check");
        allowed
    }

    /// Mark `channel` as fired now, starting its interval.
    pub fn prime(&self, channel: Channel) {
        if let Some(mut gate) = self.gates.get_mut(&channel) {
            gate.last_fired_at = Some(Instant::now());
        }
    }

    pub fn interval(&self, channel: Channel) -> Duration {
        self.gates
            .get(&channel)
            .map(|g| g.min_interval)
            .unwrap_or(Duration::ZERO)
    }

    pub fn last_fired_at(&self, channel: Channel) -> Option<Instant> {
        self.gates.get(&channel).and_then(|g| g.last_fired_at)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
