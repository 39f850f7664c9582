//! Collaborator interfaces.
//!
//! The reconfiguration core only needs latched broadcast, subscription and
//! request/response over named channels. Payloads are opaque bytes; the
//! core encodes its messages with [`crate::wire`] before handing them over.
//! Channel names passed to a transport are always fully qualified
//! (`/ns/node/parameter_updates`).

use std::sync::Arc;

use crate::error::Result;

/// Invoked for every payload received on a subscribed channel.
pub type PayloadHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Serves one request. An `Err` is reported to the caller as a failed call.
pub type RpcHandler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// Receives the single completion of an outgoing call.
pub type ReplyCallback = Box<dyn FnOnce(Result<Vec<u8>>) + Send>;

pub trait Transport: Send + Sync + 'static {
    /// Whether the transport can still create endpoints and move data.
    fn is_connected(&self) -> bool;

    /// Declare a publisher whose last payload is handed to every future
    /// subscriber as soon as it subscribes.
    fn advertise_latched(&self, topic: &str) -> Result<Box<dyn LatchedPublisher>>;

    fn subscribe(&self, topic: &str, handler: PayloadHandler) -> Result<Box<dyn EndpointHandle>>;

    fn serve(&self, service: &str, handler: RpcHandler) -> Result<Box<dyn EndpointHandle>>;

    fn client(&self, service: &str) -> Result<Box<dyn RpcClient>>;
}

pub trait LatchedPublisher: Send + Sync {
    /// Returns once the payload has been handed to the transport.
    fn publish(&self, payload: Vec<u8>) -> Result<()>;

    fn undeclare(self: Box<Self>) -> Result<()>;
}

pub trait RpcClient: Send + Sync {
    /// Issue a request. Once this returns `Ok`, `on_reply` runs exactly
    /// once, on another thread.
    fn call(&self, request: Vec<u8>, on_reply: ReplyCallback) -> Result<()>;

    fn undeclare(self: Box<Self>) -> Result<()>;
}

/// A subscription or served endpoint, released by `undeclare`.
pub trait EndpointHandle: Send + Sync {
    fn undeclare(self: Box<Self>) -> Result<()>;
}
