//! Observer/requester side of the protocol.
//!
//! A client mirrors the latest description and configuration broadcast by
//! one server and sends it partial updates. Cached values are replaced
//! wholesale on every broadcast and read without locking; the two caches
//! are independent, so a newer configuration may sit next to an older
//! description.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::Builder;
use crate::description::{ConfigDescription, Group};
use crate::error::{ReconfigureError, Result};
use crate::names::{self, DESCRIPTIONS_TOPIC, SET_PARAMETERS_SERVICE, UPDATES_TOPIC};
use crate::param_set::ParameterSet;
use crate::transport::{EndpointHandle, PayloadHandler, RpcClient, Transport};
use crate::wire::{self, Config, ReconfigureRequest, ReconfigureResponse, WireConfigDescription};

pub type ConfigCallback = Arc<dyn Fn(&ParameterSet) + Send + Sync>;
pub type DescriptionCallback = Arc<dyn Fn(&ConfigDescription) + Send + Sync>;

pub struct ReconfigureClientBuilder {
    server_name: String,
    namespace: String,
    transport: Option<Arc<dyn Transport>>,
    config_callback: Option<ConfigCallback>,
    description_callback: Option<DescriptionCallback>,
}

impl ReconfigureClientBuilder {
    /// Client of the server running on node `server_name`.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            namespace: String::new(),
            transport: None,
            config_callback: None,
            description_callback: None,
        }
    }

    /// Namespace of the server node.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_transport<T: Transport>(self, transport: T) -> Self {
        self.with_shared_transport(Arc::new(transport))
    }

    pub fn with_shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_config_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ParameterSet) + Send + Sync + 'static,
    {
        self.config_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_description_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ConfigDescription) + Send + Sync + 'static,
    {
        self.description_callback = Some(Arc::new(callback));
        self
    }
}

impl Builder for ReconfigureClientBuilder {
    type Output = ReconfigureClient;

    #[tracing::instrument(name = "reconfigure_client_build", skip(self), fields(
        server = %self.server_name,
        namespace = %self.namespace
    ))]
    fn build(self) -> Result<ReconfigureClient> {
        let transport = match self.transport {
            Some(t) if t.is_connected() => t,
            _ => return Err(ReconfigureError::NotConnected),
        };
        let qualify = |name: &str| names::qualify_name(name, &self.namespace, &self.server_name);
        let descriptions_topic = qualify(DESCRIPTIONS_TOPIC)?;
        let updates_topic = qualify(UPDATES_TOPIC)?;
        let service_name = qualify(SET_PARAMETERS_SERVICE)?;

        let shared = Arc::new(ClientShared {
            config: ArcSwapOption::empty(),
            description: ArcSwapOption::empty(),
            config_callback: RwLock::new(self.config_callback),
            description_callback: RwLock::new(self.description_callback),
            received: Mutex::new(()),
            received_cv: Condvar::new(),
        });

        let rpc = transport.client(&service_name)?;

        let on_description: PayloadHandler = {
            let shared = shared.clone();
            Arc::new(move |payload: &[u8]| shared.on_description(payload))
        };
        let descriptions = transport.subscribe(&descriptions_topic, on_description)?;

        let on_update: PayloadHandler = {
            let shared = shared.clone();
            Arc::new(move |payload: &[u8]| shared.on_update(payload))
        };
        let updates = match transport.subscribe(&updates_topic, on_update) {
            Ok(updates) => updates,
            Err(e) => {
                let _ = descriptions.undeclare();
                return Err(e);
            }
        };

        info!("[RCFG-CLI] Connected to {}", service_name);
        Ok(ReconfigureClient {
            shared,
            service_name,
            endpoints: Mutex::new(Some(ClientEndpoints {
                descriptions,
                updates,
                rpc,
            })),
        })
    }
}

struct ClientShared {
    config: ArcSwapOption<ParameterSet>,
    description: ArcSwapOption<ConfigDescription>,
    config_callback: RwLock<Option<ConfigCallback>>,
    description_callback: RwLock<Option<DescriptionCallback>>,
    received: Mutex<()>,
    received_cv: Condvar,
}

impl ClientShared {
    fn on_update(&self, payload: &[u8]) {
        let config = match wire::decode::<Config>(payload) {
            Ok(config) => Arc::new(config.to_set()),
            Err(e) => {
                warn!("[RCFG-CLI] Dropping undecodable update: {}", e);
                return;
            }
        };
        trace!("[RCFG-CLI] Update received: {} parameter(s)", config.len());
        self.config.store(Some(config.clone()));
        self.notify();

        let callback = self.config_callback.read().clone();
        if let Some(callback) = callback {
            callback(&config);
        }
    }

    fn on_description(&self, payload: &[u8]) {
        let description = match wire::decode::<WireConfigDescription>(payload)
            .and_then(|msg| msg.to_description())
        {
            Ok(description) => Arc::new(description),
            Err(e) => {
                warn!("[RCFG-CLI] Dropping undecodable description: {}", e);
                return;
            }
        };
        debug!(
            "[RCFG-CLI] Description received: {} parameter(s)",
            description.len()
        );
        self.description.store(Some(description.clone()));
        self.notify();

        let callback = self.description_callback.read().clone();
        if let Some(callback) = callback {
            callback(&description);
        }
    }

    fn notify(&self) {
        let _guard = self.received.lock();
        self.received_cv.notify_all();
    }

    fn wait_for<T>(&self, timeout: Duration, cached: impl Fn() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.received.lock();
        loop {
            if let Some(value) = cached() {
                return Some(value);
            }
            if self.received_cv.wait_until(&mut guard, deadline).timed_out() {
                return cached();
            }
        }
    }
}

struct ClientEndpoints {
    descriptions: Box<dyn EndpointHandle>,
    updates: Box<dyn EndpointHandle>,
    rpc: Box<dyn RpcClient>,
}

pub struct ReconfigureClient {
    shared: Arc<ClientShared>,
    service_name: String,
    endpoints: Mutex<Option<ClientEndpoints>>,
}

impl ReconfigureClient {
    pub fn builder(server_name: impl Into<String>) -> ReconfigureClientBuilder {
        ReconfigureClientBuilder::new(server_name)
    }

    /// Latest configuration broadcast by the server, if any arrived yet.
    pub fn configuration(&self) -> Option<Arc<ParameterSet>> {
        self.shared.config.load_full()
    }

    pub fn description(&self) -> Option<Arc<ConfigDescription>> {
        self.shared.description.load_full()
    }

    /// The single parameter group of the latest description.
    pub fn group_description(&self) -> Option<Group> {
        self.description().map(|d| d.group().clone())
    }

    /// Block until a configuration has been received or `timeout` expires.
    pub fn wait_for_configuration(&self, timeout: Duration) -> Option<Arc<ParameterSet>> {
        self.shared
            .wait_for(timeout, || self.shared.config.load_full())
    }

    pub fn wait_for_description(&self, timeout: Duration) -> Option<Arc<ConfigDescription>> {
        self.shared
            .wait_for(timeout, || self.shared.description.load_full())
    }

    /// Replace the update listener. It is invoked at once with the cached
    /// configuration when there is one.
    pub fn set_config_callback<F>(&self, callback: F)
    where
        F: Fn(&ParameterSet) + Send + Sync + 'static,
    {
        let callback: ConfigCallback = Arc::new(callback);
        *self.shared.config_callback.write() = Some(callback.clone());
        if let Some(config) = self.configuration() {
            callback(&config);
        }
    }

    pub fn set_description_callback<F>(&self, callback: F)
    where
        F: Fn(&ConfigDescription) + Send + Sync + 'static,
    {
        let callback: DescriptionCallback = Arc::new(callback);
        *self.shared.description_callback.write() = Some(callback.clone());
        if let Some(description) = self.description() {
            callback(&description);
        }
    }

    pub fn clear_config_callback(&self) {
        self.shared.config_callback.write().take();
    }

    pub fn clear_description_callback(&self) {
        self.shared.description_callback.write().take();
    }

    pub fn has_config_callback(&self) -> bool {
        self.shared.config_callback.read().is_some()
    }

    pub fn has_description_callback(&self) -> bool {
        self.shared.description_callback.read().is_some()
    }

    /// Ask the server to apply `update` as a partial configuration.
    ///
    /// Returns as soon as the request is sent. Concurrent requests complete
    /// in no particular order.
    pub fn update_configuration(&self, update: &ParameterSet) -> Result<PendingUpdate> {
        let endpoints = self.endpoints.lock();
        let endpoints = endpoints.as_ref().ok_or(ReconfigureError::Closed)?;

        let request = wire::encode(&ReconfigureRequest {
            config: Config::from_set(update),
        })?;
        debug!(
            "[RCFG-CLI] Requesting update of {} parameter(s) on {}",
            update.len(),
            self.service_name
        );

        let (tx, rx) = flume::bounded(1);
        endpoints.rpc.call(
            request,
            Box::new(move |reply: Result<Vec<u8>>| {
                let result = reply
                    .and_then(|bytes| wire::decode::<ReconfigureResponse>(&bytes))
                    .map(|response| response.config.to_set());
                let _ = tx.send(result);
            }),
        )?;
        Ok(PendingUpdate { rx })
    }

    /// Undeclare both subscriptions and the RPC client. Idempotent.
    pub fn close(&self) {
        let Some(endpoints) = self.endpoints.lock().take() else {
            return;
        };
        for (what, result) in [
            ("description subscription", endpoints.descriptions.undeclare()),
            ("update subscription", endpoints.updates.undeclare()),
            ("rpc client", endpoints.rpc.undeclare()),
        ] {
            if let Err(e) = result {
                warn!("[RCFG-CLI] Failed to undeclare {}: {}", what, e);
            }
        }
        info!("[RCFG-CLI] Closed client of {}", self.service_name);
    }

    pub fn is_closed(&self) -> bool {
        self.endpoints.lock().is_none()
    }
}

impl Drop for ReconfigureClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Completion of one [`ReconfigureClient::update_configuration`] call.
#[derive(Debug)]
pub struct PendingUpdate {
    rx: flume::Receiver<Result<ParameterSet>>,
}

impl PendingUpdate {
    /// Block for the configuration committed by the server.
    pub fn wait(self, timeout: Duration) -> Result<ParameterSet> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            flume::RecvTimeoutError::Timeout => {
                ReconfigureError::Transport(format!("no reply within {:?}", timeout))
            }
            flume::RecvTimeoutError::Disconnected => {
                ReconfigureError::Transport("request dropped without reply".to_string())
            }
        })?
    }

    pub async fn recv_async(self) -> Result<ParameterSet> {
        self.rx
            .recv_async()
            .await
            .map_err(|_| ReconfigureError::Transport("request dropped without reply".to_string()))?
    }

    /// The reply, if it already arrived.
    pub fn try_recv(&self) -> Option<Result<ParameterSet>> {
        self.rx.try_recv().ok()
    }
}
