pub mod auth;
pub mod cli;
pub mod config;
pub mod disk;
pub mod error;
pub mod logging;
pub mod session;
pub mod transport;

pub use auth::HubAuth;
pub use config::HubConfig;
pub use error::{HubError, Result};
pub use session::{
    CallbackRegistry, CheckpointOutcome, MetricsFlush, TrainerCallbacks, TrainerEvent,
    TrainerState, TrainingSession,
};
pub use transport::{HubTransport, ReqwestTransport, RetryingTransport, TransportError};
