//! A Debug Adapter Protocol client runtime: framed transport, message
//! broker, session handshake, and breakpoint reconciliation.

pub mod breakpoints;
pub mod broker;
pub mod error;
pub mod host_delegate;
pub mod json;
pub mod manifest;
pub mod message;
pub mod protocol;
pub mod session;
pub mod transport;

pub use breakpoints::{ConditionalBreakpoint, ExceptionFilterOptions, HitCondition, HitOperator};
pub use broker::Broker;
pub use error::{Error, Result};
pub use host_delegate::HostDelegate;
pub use manifest::{ManifestDescriptor, SessionRecord};
pub use message::Message;
pub use session::{Session, SessionEvent, SessionState};
pub use transport::Transport;
