//! The authoritative side of the protocol.
//!
//! A server owns one [`Reconfigurable`] configuration object. At startup it
//! restores persisted values, publishes the description, then publishes the
//! current configuration and starts serving update requests.
//!
//! [`ReconfigureServer::change_config`] is the only mutator. Calls are
//! serialized: merge, clamp, level computation, callback, commit and the
//! update broadcast all happen under one lock, so every broadcast reflects
//! a fully applied state. Persistence runs afterwards on a snapshot, in
//! commit order.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::Builder;
use crate::config::Reconfigurable;
use crate::description::ConfigDescription;
use crate::error::{ReconfigureError, Result};
use crate::names::{self, DESCRIPTIONS_TOPIC, SET_PARAMETERS_SERVICE, UPDATES_TOPIC};
use crate::param_set::ParameterSet;
use crate::store::{MemoryParamStore, ParamStore};
use crate::transport::{EndpointHandle, LatchedPublisher, RpcHandler, Transport};
use crate::wire::{self, Config, ReconfigureRequest, ReconfigureResponse, WireConfigDescription};

/// User hook run on every accepted change.
///
/// Receives the merged and clamped configuration together with the change
/// level, and returns the configuration to commit. Returning `None` rejects
/// the change. The hook runs while the server is locked and must not call
/// back into the server.
pub type ReconfigureCallback<C> = Arc<dyn Fn(C, u32) -> Option<C> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ServerState {
    Uninitialized,
    Restoring,
    Ready,
    Reconfiguring,
    Closed,
}

pub struct ReconfigureServerBuilder<C> {
    name: String,
    namespace: String,
    config: C,
    callback: ReconfigureCallback<C>,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn ParamStore>>,
}

impl<C: Reconfigurable> ReconfigureServerBuilder<C> {
    pub fn new<F>(name: impl Into<String>, config: C, callback: F) -> Self
    where
        F: Fn(C, u32) -> Option<C> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            namespace: String::new(),
            config,
            callback: Arc::new(callback),
            transport: None,
            store: None,
        }
    }

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

    /// Persist values in `store`. Without one, values live in memory only.
    pub fn with_store<S: ParamStore>(self, store: S) -> Self {
        self.with_shared_store(Arc::new(store))
    }

    pub fn with_shared_store(mut self, store: Arc<dyn ParamStore>) -> Self {
        self.store = Some(store);
        self
    }
}

impl<C: Reconfigurable> Builder for ReconfigureServerBuilder<C> {
    type Output = ReconfigureServer<C>;

    #[tracing::instrument(name = "reconfigure_server_build", skip(self), fields(
        name = %self.name,
        namespace = %self.namespace
    ))]
    fn build(self) -> Result<ReconfigureServer<C>> {
        let transport = match self.transport {
            Some(t) if t.is_connected() => t,
            _ => return Err(ReconfigureError::NotConnected),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryParamStore::new()));

        let owner = names::node_fqn(&self.namespace, &self.name)?;
        let qualify = |name: &str| names::qualify_name(name, &self.namespace, &self.name);
        let descriptions_topic = qualify(DESCRIPTIONS_TOPIC)?;
        let updates_topic = qualify(UPDATES_TOPIC)?;
        let service_name = qualify(SET_PARAMETERS_SERVICE)?;

        let mut config = self.config;
        debug!("[RCFG-SRV] {}: {}", owner, ServerState::Restoring);
        let restored = restore(store.as_ref(), &owner, &mut config);
        info!(
            "[RCFG-SRV] {}: restored {} of {} parameters",
            owner,
            restored,
            config.base().current_config().len()
        );

        let descriptions = transport.advertise_latched(&descriptions_topic)?;
        let updates = transport.advertise_latched(&updates_topic)?;

        let shared = Arc::new(Shared {
            owner,
            callback: self.callback,
            store,
            state: Mutex::new(ServerState::Restoring),
            core: Mutex::new(Core {
                config,
                endpoints: Some(Endpoints {
                    descriptions,
                    updates,
                    service: None,
                }),
            }),
            persist_order: Mutex::new(()),
        });
        let server = ReconfigureServer {
            shared: shared.clone(),
        };

        shared.publish_description()?;
        *shared.state.lock() = ServerState::Ready;

        // Publish the (possibly restored) configuration before serving.
        let initial = server.current_config();
        server.change_config(&initial, 0)?;

        let service = transport.serve(&service_name, rpc_handler(Arc::downgrade(&shared)))?;
        if let Some(endpoints) = shared.core.lock().endpoints.as_mut() {
            endpoints.service = Some(service);
        }

        info!(
            "[RCFG-SRV] Ready: updates={}, descriptions={}, service={}",
            updates_topic, descriptions_topic, service_name
        );
        Ok(server)
    }
}

/// Overwrite defaults with persisted values. Misses and read failures keep
/// the default.
fn restore<C: Reconfigurable>(store: &dyn ParamStore, owner: &str, config: &mut C) -> usize {
    let mut restored = 0;
    for param in config.base_mut().current_config_mut().iter_mut() {
        let key = names::param_key(owner, &param.name);
        match store.get(&key) {
            Ok(Some(value)) if value.param_type() == param.param_type() => {
                trace!("[RCFG-SRV] Restored {} = {}", key, value);
                param.value = value;
                restored += 1;
            }
            Ok(Some(value)) => warn!(
                "[RCFG-SRV] Ignoring stored {} for {}: declared as {}",
                value.param_type(),
                key,
                param.param_type()
            ),
            Ok(None) => trace!("[RCFG-SRV] No stored value for {}", key),
            Err(e) => warn!("[RCFG-SRV] Failed to read {}: {}", key, e),
        }
    }
    restored
}

fn rpc_handler<C: Reconfigurable>(shared: Weak<Shared<C>>) -> RpcHandler {
    Arc::new(move |payload: &[u8]| -> Result<Vec<u8>> {
        let shared = shared.upgrade().ok_or(ReconfigureError::Closed)?;
        let request: ReconfigureRequest = wire::decode(payload)?;
        let incoming = request.config.to_set();
        debug!(
            "[RCFG-SRV] Update request for {} parameter(s)",
            incoming.len()
        );

        let applied = shared.change_config(&incoming, 0).inspect_err(|e| {
            warn!("[RCFG-SRV] Update request rejected: {}", e);
        })?;
        wire::encode(&ReconfigureResponse {
            config: Config::from_set(&applied),
        })
    })
}

struct Endpoints {
    descriptions: Box<dyn LatchedPublisher>,
    updates: Box<dyn LatchedPublisher>,
    service: Option<Box<dyn EndpointHandle>>,
}

struct Core<C> {
    config: C,
    endpoints: Option<Endpoints>,
}

struct Shared<C> {
    owner: String,
    callback: ReconfigureCallback<C>,
    store: Arc<dyn ParamStore>,
    state: Mutex<ServerState>,
    core: Mutex<Core<C>>,
    // taken before `core` is released so snapshots reach the store in commit order
    persist_order: Mutex<()>,
}

impl<C: Reconfigurable> Shared<C> {
    fn set_state(&self, state: ServerState) {
        *self.state.lock() = state;
    }

    fn publish_description(&self) -> Result<()> {
        let core = self.core.lock();
        let endpoints = core.endpoints.as_ref().ok_or(ReconfigureError::Closed)?;
        let msg = WireConfigDescription::from_description(core.config.base().description());
        endpoints.descriptions.publish(wire::encode(&msg)?)?;
        debug!(
            "[RCFG-SRV] {}: description published ({} parameters)",
            self.owner,
            core.config.base().description().len()
        );
        Ok(())
    }

    fn change_config(&self, incoming: &ParameterSet, level: u32) -> Result<ParameterSet> {
        let (snapshot, _persist_guard) = {
            let mut core = self.core.lock();
            if core.endpoints.is_none() {
                return Err(ReconfigureError::Closed);
            }
            self.set_state(ServerState::Reconfiguring);

            let description = core.config.base().description();
            let before = core.config.base().current_config().clone();

            let mut candidate = core.config.clone();
            let applied = candidate.base_mut().merge(incoming);
            let clamped = description.clamp(candidate.base_mut().current_config_mut());
            let level = level | description.calc_level(&before, candidate.base().current_config());
            debug!(
                "[RCFG-SRV] {}: merged {} value(s), clamped {}, level={:#x}",
                self.owner, applied, clamped, level
            );

            let Some(accepted) = (self.callback)(candidate, level) else {
                self.set_state(ServerState::Ready);
                error!("[RCFG-SRV] {}: callback returned no configuration", self.owner);
                return Err(ReconfigureError::CallbackContractViolation);
            };
            core.config = accepted;
            let snapshot = core.config.base().current_config().clone();

            if let Some(endpoints) = core.endpoints.as_ref() {
                let published = wire::encode(&Config::from_set(&snapshot))
                    .and_then(|payload| endpoints.updates.publish(payload));
                if let Err(e) = published {
                    error!("[RCFG-SRV] {}: update broadcast failed: {}", self.owner, e);
                }
            }
            self.set_state(ServerState::Ready);
            (snapshot, self.persist_order.lock())
        };

        self.persist(&snapshot);
        Ok(snapshot)
    }

    fn persist(&self, snapshot: &ParameterSet) {
        for param in snapshot {
            let key = names::param_key(&self.owner, &param.name);
            if let Err(e) = self.store.set(&key, &param.value) {
                warn!("[RCFG-SRV] Failed to persist {}: {}", key, e);
            }
        }
    }

    fn close(&self) {
        let endpoints = {
            let mut core = self.core.lock();
            let endpoints = core.endpoints.take();
            self.set_state(ServerState::Closed);
            endpoints
        };
        let Some(endpoints) = endpoints else {
            return;
        };

        if let Some(Err(e)) = endpoints.service.map(|service| service.undeclare()) {
            warn!("[RCFG-SRV] Failed to undeclare service: {}", e);
        }
        for publisher in [endpoints.updates, endpoints.descriptions] {
            if let Err(e) = publisher.undeclare() {
                warn!("[RCFG-SRV] Failed to undeclare publisher: {}", e);
            }
        }
        info!("[RCFG-SRV] {}: closed", self.owner);
    }
}

pub struct ReconfigureServer<C: Reconfigurable> {
    shared: Arc<Shared<C>>,
}

impl<C: Reconfigurable> ReconfigureServer<C> {
    pub fn builder<F>(name: impl Into<String>, config: C, callback: F) -> ReconfigureServerBuilder<C>
    where
        F: Fn(C, u32) -> Option<C> + Send + Sync + 'static,
    {
        ReconfigureServerBuilder::new(name, config, callback)
    }

    /// Apply `incoming` as a partial update and return the committed values.
    ///
    /// The level handed to the callback is `level` combined with the levels
    /// of every parameter whose value changed. Fails with
    /// `CallbackContractViolation`, leaving the configuration untouched,
    /// when the callback returns `None`.
    pub fn change_config(&self, incoming: &ParameterSet, level: u32) -> Result<ParameterSet> {
        self.shared.change_config(incoming, level)
    }

    pub fn current_config(&self) -> ParameterSet {
        self.shared.core.lock().config.base().current_config().clone()
    }

    /// A copy of the whole configuration object.
    pub fn config(&self) -> C {
        self.shared.core.lock().config.clone()
    }

    pub fn description(&self) -> ConfigDescription {
        self.shared.core.lock().config.base().description().clone()
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state.lock()
    }

    /// Fully qualified name of the owning node, also the persistence prefix.
    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    /// Undeclare the service and both broadcast channels. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl<C: Reconfigurable> Drop for ReconfigureServer<C> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::BaseConfig;
    use crate::local::LocalTransport;
    use crate::value::{ParamType, ParamValue};

    fn driver_config() -> BaseConfig {
        let mut config = BaseConfig::new();
        config
            .add_field("enabled", ParamType::Bool, 1, "", true, None, None)
            .unwrap();
        config
            .add_field(
                "rate",
                ParamType::Int,
                2,
                "",
                8,
                Some(ParamValue::Int(0)),
                Some(ParamValue::Int(88)),
            )
            .unwrap();
        config
            .add_field("label", ParamType::Str, 4, "", "x", None, None)
            .unwrap();
        config
    }

    fn accept(config: BaseConfig, _level: u32) -> Option<BaseConfig> {
        Some(config)
    }

    #[test]
    fn test_build_requires_transport() {
        let err = ReconfigureServer::builder("driver", driver_config(), accept)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ReconfigureError::NotConnected));

        let transport = LocalTransport::new();
        transport.shutdown();
        let err = ReconfigureServer::builder("driver", driver_config(), accept)
            .with_transport(transport)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ReconfigureError::NotConnected));
    }

    #[test]
    fn test_build_publishes_and_serves() {
        let transport = LocalTransport::new();
        let server = ReconfigureServer::builder("driver", driver_config(), accept)
            .with_namespace("/robot")
            .with_transport(transport.clone())
            .build()
            .unwrap();

        assert_eq!(server.state(), ServerState::Ready);
        assert_eq!(server.owner(), "/robot/driver");
        assert!(transport.latched("/robot/driver/parameter_descriptions").is_some());
        assert!(transport.latched("/robot/driver/parameter_updates").is_some());
        assert!(transport.is_served("/robot/driver/set_parameters"));
    }

    #[test]
    fn test_level_is_or_of_changed_parameters() {
        let seen = Arc::new(AtomicU32::new(u32::MAX));
        let levels = seen.clone();
        let server = ReconfigureServer::builder("driver", driver_config(), move |c, level| {
            levels.store(level, Ordering::SeqCst);
            Some(c)
        })
        .with_transport(LocalTransport::new())
        .build()
        .unwrap();
        // initial publish changes nothing
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        let update = ParameterSet::new().with("rate", 9).with("label", "y");
        server.change_config(&update, 0).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2 | 4);

        // caller-supplied bits are kept; an unchanged value adds nothing
        server.change_config(&update, 16).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_callback_may_rewrite_configuration() {
        let server = ReconfigureServer::builder("driver", driver_config(), |mut c: BaseConfig, _| {
            if c.get_int("rate", 0) > 50 {
                c.set_bool("enabled", false).ok()?;
            }
            Some(c)
        })
        .with_transport(LocalTransport::new())
        .build()
        .unwrap();

        let applied = server
            .change_config(&ParameterSet::new().with("rate", 60), 0)
            .unwrap();
        assert_eq!(applied.get_bool("enabled"), Some(false));
        assert_eq!(server.current_config(), applied);
    }

    #[test]
    fn test_close_is_idempotent() {
        let transport = LocalTransport::new();
        let server = ReconfigureServer::builder("driver", driver_config(), accept)
            .with_transport(transport.clone())
            .build()
            .unwrap();

        server.close();
        server.close();
        assert_eq!(server.state(), ServerState::Closed);
        assert!(!transport.is_served("/driver/set_parameters"));
        assert!(transport.latched("/driver/parameter_updates").is_none());
        assert!(matches!(
            server.change_config(&ParameterSet::new(), 0),
            Err(ReconfigureError::Closed)
        ));
    }

    #[test]
    fn test_restore_skips_type_conflicts() {
        let store = Arc::new(MemoryParamStore::new());
        store.set("/driver/rate", &ParamValue::Str("fast".into())).unwrap();
        store.set("/driver/label", &ParamValue::Str("kept".into())).unwrap();

        let server = ReconfigureServer::builder("driver", driver_config(), accept)
            .with_transport(LocalTransport::new())
            .with_shared_store(store.clone())
            .build()
            .unwrap();
        assert_eq!(server.current_config().get_int("rate"), Some(8));
        assert_eq!(server.current_config().get_str("label"), Some("kept"));
        // the initial publish persisted the declared type back
        assert_eq!(store.get("/driver/rate").unwrap(), Some(ParamValue::Int(8)));
    }

    /// Store whose reads and writes always fail.
    struct FailingStore;

    impl ParamStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<ParamValue>> {
            Err(ReconfigureError::Persistence("disk unavailable".into()))
        }

        fn set(&self, _key: &str, _value: &ParamValue) -> Result<()> {
            Err(ReconfigureError::Persistence("disk unavailable".into()))
        }
    }

    #[test]
    fn test_store_failures_keep_memory_and_broadcast() {
        let transport = LocalTransport::new();
        let server = ReconfigureServer::builder("driver", driver_config(), accept)
            .with_transport(transport.clone())
            .with_store(FailingStore)
            .build()
            .unwrap();
        assert_eq!(server.current_config().get_int("rate"), Some(8));
        assert_eq!(server.current_config().get_bool("enabled"), Some(true));

        let applied = server
            .change_config(&ParameterSet::new().with("rate", 200), 0)
            .unwrap();
        assert_eq!(applied.get_int("rate"), Some(88));
        assert_eq!(server.current_config(), applied);

        let latched = transport.latched("/driver/parameter_updates").unwrap();
        let broadcast = wire::decode::<Config>(&latched).unwrap().to_set();
        assert_eq!(broadcast.get_int("rate"), Some(88));
        assert_eq!(broadcast.get_str("label"), Some("x"));
    }

    #[test]
    fn test_nan_update_is_not_invented() {
        let mut config = BaseConfig::new();
        config
            .add_field("gain", ParamType::Double, 1, "", 1.0, None, None)
            .unwrap();
        config
            .add_field(
                "ratio",
                ParamType::Double,
                2,
                "",
                0.5,
                Some(ParamValue::Double(0.0)),
                Some(ParamValue::Double(1.0)),
            )
            .unwrap();
        let seen = Arc::new(AtomicU32::new(0));
        let levels = seen.clone();
        let server = ReconfigureServer::builder("driver", config, move |c, level| {
            levels.store(level, Ordering::SeqCst);
            Some(c)
        })
        .with_transport(LocalTransport::new())
        .build()
        .unwrap();

        let update = ParameterSet::new().with("gain", f64::NAN).with("ratio", f64::NAN);
        let applied = server.change_config(&update, 0).unwrap();
        assert!(applied.get_double("gain").is_some_and(f64::is_nan));
        assert!(applied.get_double("ratio").is_some_and(f64::is_nan));
        assert_eq!(seen.load(Ordering::SeqCst), 1 | 2);

        server.change_config(&update, 0).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_store_ends_with_last_committed_values() {
        let store = Arc::new(MemoryParamStore::new());
        let server = Arc::new(
            ReconfigureServer::builder("driver", driver_config(), accept)
                .with_transport(LocalTransport::new())
                .with_shared_store(store.clone())
                .build()
                .unwrap(),
        );

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let server = server.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        let update = ParameterSet::new().with("rate", i * 10 + j);
                        server.change_config(&update, 0).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let rate = server.current_config().get_int("rate").unwrap();
        assert_eq!(store.get("/driver/rate").unwrap(), Some(ParamValue::Int(rate)));
    }
}
