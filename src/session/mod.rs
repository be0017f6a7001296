//! Training-session synchronizer: everything a trainer needs to stay in step
//! with the hub while it runs.

pub mod callbacks;
pub mod heartbeat;
pub mod metrics_queue;
pub mod model;
pub mod rate_limit;
pub mod training;

pub use callbacks::{
    Callback, CallbackFuture, CallbackRegistry, TrainerCallbacks, TrainerEvent, TrainerState,
    MAP_METRIC_KEY,
};
pub use heartbeat::{HeartbeatHandle, HeartbeatLoop, HeartbeatState, HeartbeatStatus};
pub use metrics_queue::{MetricsQueue, MetricsSnapshot};
pub use model::{DatasetInfo, HubEndpoints, HubModel};
pub use rate_limit::{Channel, RateLimiter};
pub use training::{CheckpointOutcome, MetricsFlush, TrainingSession};
