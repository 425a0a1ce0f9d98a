//! The host application's capability surface, injected into a [`crate::session::Session`]
//! to service adapter-initiated reverse requests.
//!
//! Built as a trait object, in the same `async_trait` idiom used
//! elsewhere in this crate's broker and session collaborators.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{RunInTerminalRequest, RunInTerminalResult, StartDebuggingRequest, StartDebuggingResult};

/// Host-provided operations an adapter may ask the client to perform on
/// its behalf. Unimplemented by default; a session without a configured
/// delegate fails these with `UnsupportedFeature`.
#[async_trait]
pub trait HostDelegate: Send + Sync {
    async fn run_in_terminal(&self, request: RunInTerminalRequest) -> Result<RunInTerminalResult>;

    async fn start_debugging(&self, request: StartDebuggingRequest) -> Result<StartDebuggingResult>;
}
