pub mod api;
pub mod poller;
pub mod processor;
pub mod runtime;
pub mod store;
pub mod tzkt;
pub mod types;

pub use poller::Poller;
pub use processor::Processor;
pub use runtime::config::{
    DbConfig, LogConfig, MetricsConfig, PollerConfig, ServerConfig, TzktConfig, ValidationConfig,
    WatcherConfig,
};
pub use runtime::supervisor::{fatal_channel, FatalErrorSender, Outcome, Supervisor};
pub use runtime::telemetry::{init_tracing, spawn_metrics_server, Telemetry, TelemetrySnapshot};
pub use store::{PostgresStore, Store};
pub use tzkt::{DelegationFetcher, HeadInit, HeadSubscriber, TzktClient, TzktError};
pub use types::{Delegation, FetchedDelegation, PipelineMessage, Sender};
