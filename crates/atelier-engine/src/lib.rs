pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod dryrun;
pub mod error;
pub mod extract;
pub mod finalize;
pub mod jobs;
pub mod orchestrator;
pub mod pool;
pub mod store;
pub mod transport;

mod util;

#[cfg(test)]
mod testing;

pub use compiler::{compile, CompiledPayload};
pub use config::Config;
pub use dispatch::{DispatchError, Dispatcher, ProviderResponse};
pub use error::OrchestrationError;
pub use finalize::{Finalizer, StoredArtifactRef};
pub use jobs::{CancelToken, JobHandle, JobTracker};
pub use orchestrator::{Generation, JobStatusReport, JobTicket, Orchestrator, Submission};
pub use pool::{CredentialPool, PairIndex};
pub use transport::{HttpTransport, ReqwestTransport};
