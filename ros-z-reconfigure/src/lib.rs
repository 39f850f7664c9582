//! Runtime reconfiguration of typed node parameters.
//!
//! A [`ReconfigureServer`] owns a configuration object, restores it from a
//! [`ParamStore`], and broadcasts its description and current values on
//! latched channels. [`ReconfigureClient`]s mirror those broadcasts and
//! send partial updates through the server's `set_parameters` endpoint.
//! Everything on the network goes through the [`Transport`] trait; the
//! crate ships an in-process [`LocalTransport`] and a zenoh-backed
//! [`ZenohTransport`].

pub mod client;
pub mod config;
pub mod description;
pub mod error;
pub mod local;
pub mod names;
pub mod param_set;
pub mod server;
pub mod store;
pub mod transport;
pub mod value;
pub mod wire;
pub mod zenoh_transport;

pub use client::{PendingUpdate, ReconfigureClient, ReconfigureClientBuilder};
pub use config::{BaseConfig, Reconfigurable};
pub use description::{ConfigDescription, Group, ParamDescription};
pub use error::{ReconfigureError, Result};
pub use local::LocalTransport;
pub use param_set::ParameterSet;
pub use server::{ReconfigureCallback, ReconfigureServer, ReconfigureServerBuilder, ServerState};
pub use store::{JsonFileParamStore, MemoryParamStore, ParamStore};
pub use transport::Transport;
pub use value::{ParamType, ParamValue, Parameter};
pub use zenoh_transport::{ZenohTransport, ZenohTransportBuilder};

pub trait Builder {
    type Output;
    fn build(self) -> Result<Self::Output>;
}
