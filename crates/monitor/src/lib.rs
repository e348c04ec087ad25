//! Library entrypoint for embedding the monitor inside other binaries (e.g.,
//! the API process). The binary in `main.rs` runs the same monitor headless.

pub mod detector;
pub mod pipeline;
pub mod rpc;
pub mod signer;
pub mod verifier;
pub mod worker;

#[cfg(test)]
mod testing;

pub use detector::{BalanceDelta, DeltaDetector};
pub use pipeline::{AttemptError, ForwardingPipeline, PipelineError, RetryPolicy};
pub use rpc::TronHttpLedger;
pub use signer::{HttpExternalSigner, TimedSigner};
pub use verifier::MultisigVerifier;
pub use worker::{build_monitor, run_monitor, Monitor, MonitorError, MonitorSnapshot};
