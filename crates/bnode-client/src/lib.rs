//! HTTP transports for the scheduler and the artifact store.

mod error;
pub use error::ClientError;

mod http;
pub use http::Endpoint;

mod scheduler;
pub use scheduler::HttpScheduler;

mod store;
pub use store::HttpArtifactStore;
