//! Process runtime for the tuple-delivery layer: configuration, process
//! topology, the role-aware delivery router with relay fallback, the
//! queue-process relay loop, and the batch consumer driving
//! continuous-query execution.

pub mod config;
pub mod error;
pub mod executor;
pub mod relay;
pub mod router;
pub mod topology;

pub use config::DeliveryConfig;
pub use error::{DeliveryError, ExecError};
pub use executor::ContinuousExecutor;
pub use relay::RelayProcess;
pub use router::DeliveryRouter;
pub use topology::ProcessDirectory;
