//! [`Transport`] over a zenoh session.
//!
//! Latched channels are a publisher plus a queryable on the same key
//! expression answering with the last published payload. A new subscriber
//! declares its subscriber first, then queries the key once; the latched
//! reply is dropped if a live sample already arrived. RPC endpoints are
//! queryables and calls are `get` queries carrying the request payload.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, trace, warn};
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::query::{Query, Queryable};
use zenoh::{Session, Wait};

use crate::Builder;
use crate::error::{ReconfigureError, Result};
use crate::names::to_key_expr;
use crate::transport::{
    EndpointHandle, LatchedPublisher, PayloadHandler, ReplyCallback, RpcClient, RpcHandler,
    Transport,
};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ZenohTransportBuilder {
    config_file: Option<PathBuf>,
    config_overrides: Vec<(String, serde_json::Value)>,
    rpc_timeout: Duration,
}

impl Default for ZenohTransportBuilder {
    fn default() -> Self {
        Self {
            config_file: None,
            config_overrides: Vec::new(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

impl ZenohTransportBuilder {
    /// Load the zenoh configuration from a JSON5 file
    pub fn with_config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Add a JSON configuration override, applied after the file
    pub fn with_json<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.config_overrides.push((key.into(), value));
        self
    }

    pub fn disable_multicast_scouting(self) -> Self {
        self.with_json("scouting/multicast/enabled", json!(false))
    }

    pub fn with_connect_endpoints<I, S>(self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints.into_iter().map(|s| s.into()).collect();
        self.with_json("connect/endpoints", json!(endpoints))
    }

    pub fn with_listen_endpoints<I, S>(self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints.into_iter().map(|s| s.into()).collect();
        self.with_json("listen/endpoints", json!(endpoints))
    }

    /// Set mode (peer, client, router)
    pub fn with_mode<S: Into<String>>(self, mode: S) -> Self {
        self.with_json("mode", json!(mode.into()))
    }

    /// How long an outgoing call waits for a reply before failing.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Apply `ROSZ_CONFIG_OVERRIDE`, formatted as `key1=value1;key2=value2`
    /// with JSON5 values.
    fn apply_env_overrides(mut self) -> Result<Self> {
        let Ok(overrides) = std::env::var("ROSZ_CONFIG_OVERRIDE") else {
            return Ok(self);
        };
        debug!("[RCFG-ZT] Applying ROSZ_CONFIG_OVERRIDE: {}", overrides);

        for pair in overrides.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ReconfigureError::Transport(format!(
                    "invalid ROSZ_CONFIG_OVERRIDE entry '{}', expected 'key=value'",
                    pair
                )));
            };
            let (key, value) = (key.trim(), value.trim());
            let parsed = json5::from_str::<serde_json::Value>(value).map_err(|e| {
                ReconfigureError::Transport(format!(
                    "failed to parse ROSZ_CONFIG_OVERRIDE value for '{}': {} (value: {})",
                    key, e, value
                ))
            })?;
            debug!("[RCFG-ZT] Override: {} = {}", key, parsed);
            self.config_overrides.push((key.to_string(), parsed));
        }
        Ok(self)
    }
}

impl Builder for ZenohTransportBuilder {
    type Output = ZenohTransport;

    #[tracing::instrument(name = "zenoh_transport", skip(self), fields(
        config_file = ?self.config_file,
        overrides = self.config_overrides.len()
    ))]
    fn build(mut self) -> Result<ZenohTransport> {
        // Explicit file, then ROSZ_CONFIG_FILE, then zenoh defaults
        let mut config = if let Some(ref path) = self.config_file {
            zenoh::Config::from_file(path).map_err(ReconfigureError::transport)?
        } else if let Ok(path) = std::env::var("ROSZ_CONFIG_FILE") {
            zenoh::Config::from_file(path).map_err(ReconfigureError::transport)?
        } else {
            zenoh::Config::default()
        };

        self = self.apply_env_overrides()?;

        for (key, value) in &self.config_overrides {
            let value = value.to_string();
            config.insert_json5(key, &value).map_err(|e| {
                ReconfigureError::Transport(format!(
                    "failed to apply config override '{}' = '{}': {}",
                    key, value, e
                ))
            })?;
        }

        let session = zenoh::open(config).wait().map_err(ReconfigureError::transport)?;
        info!("[RCFG-ZT] Session opened: zid={}", session.zid());

        Ok(ZenohTransport {
            session: Arc::new(session),
            rpc_timeout: self.rpc_timeout,
        })
    }
}

#[derive(Clone)]
pub struct ZenohTransport {
    session: Arc<Session>,
    rpc_timeout: Duration,
}

impl ZenohTransport {
    pub fn builder() -> ZenohTransportBuilder {
        ZenohTransportBuilder::default()
    }

    /// Wrap a session opened elsewhere.
    pub fn from_session(session: Arc<Session>) -> Self {
        Self {
            session,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn shutdown(&self) -> Result<()> {
        self.session.close().wait().map_err(ReconfigureError::transport)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.session.is_closed() {
            Err(ReconfigureError::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl Transport for ZenohTransport {
    fn is_connected(&self) -> bool {
        !self.session.is_closed()
    }

    fn advertise_latched(&self, topic: &str) -> Result<Box<dyn LatchedPublisher>> {
        self.ensure_open()?;
        let key_expr = to_key_expr(topic).to_string();
        let latched: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));

        let publisher = self
            .session
            .declare_publisher(key_expr.clone())
            .wait()
            .map_err(ReconfigureError::transport)?;

        let cache = latched.clone();
        let reply_ke = key_expr.clone();
        let queryable = self
            .session
            .declare_queryable(key_expr.clone())
            .callback(move |query: Query| {
                let Some(payload) = cache.lock().clone() else {
                    return;
                };
                trace!("[RCFG-ZT] Answering latched query on {}", reply_ke);
                if let Err(e) = query.reply(reply_ke.clone(), payload).wait() {
                    warn!("[RCFG-ZT] Latched reply on {} failed: {}", reply_ke, e);
                }
            })
            .wait()
            .map_err(ReconfigureError::transport)?;

        debug!("[RCFG-ZT] Latched publisher ready: key_expr={}", key_expr);
        Ok(Box::new(ZenohLatchedPublisher {
            publisher,
            queryable,
            latched,
            key_expr,
        }))
    }

    fn subscribe(&self, topic: &str, handler: PayloadHandler) -> Result<Box<dyn EndpointHandle>> {
        self.ensure_open()?;
        let key_expr = to_key_expr(topic).to_string();
        let live_seen = Arc::new(AtomicBool::new(false));

        let live_handler = handler.clone();
        let seen = live_seen.clone();
        let subscriber = self
            .session
            .declare_subscriber(key_expr.clone())
            .callback(move |sample| {
                seen.store(true, Ordering::Release);
                live_handler(&*sample.payload().to_bytes());
            })
            .wait()
            .map_err(ReconfigureError::transport)?;

        let ke = key_expr.clone();
        self.session
            .get(key_expr.clone())
            .timeout(self.rpc_timeout)
            .callback(move |reply| match reply.into_result() {
                Ok(sample) if !live_seen.load(Ordering::Acquire) => {
                    trace!("[RCFG-ZT] Latched sample received on {}", ke);
                    handler(&*sample.payload().to_bytes());
                }
                Ok(_) => trace!("[RCFG-ZT] Stale latched sample on {} dropped", ke),
                Err(e) => debug!("[RCFG-ZT] Latched query on {} failed: {:?}", ke, e),
            })
            .wait()
            .map_err(ReconfigureError::transport)?;

        debug!("[RCFG-ZT] Subscriber ready: key_expr={}", key_expr);
        Ok(Box::new(ZenohSubscription { subscriber }))
    }

    fn serve(&self, service: &str, handler: RpcHandler) -> Result<Box<dyn EndpointHandle>> {
        self.ensure_open()?;
        let key_expr = to_key_expr(service).to_string();

        let reply_ke = key_expr.clone();
        let queryable = self
            .session
            .declare_queryable(key_expr.clone())
            .complete(true)
            .callback(move |query: Query| {
                let handler = handler.clone();
                let reply_ke = reply_ke.clone();
                // The handler publishes and waits on the session, which must
                // not happen on a zenoh callback thread.
                let spawned = std::thread::Builder::new()
                    .name("rcfg-zenoh-rpc".to_string())
                    .spawn(move || serve_query(&reply_ke, query, &handler));
                if let Err(e) = spawned {
                    warn!("[RCFG-ZT] Failed to spawn RPC worker: {}", e);
                }
            })
            .wait()
            .map_err(ReconfigureError::transport)?;

        debug!("[RCFG-ZT] Server ready: key_expr={}", key_expr);
        Ok(Box::new(ZenohService { queryable }))
    }

    fn client(&self, service: &str) -> Result<Box<dyn RpcClient>> {
        self.ensure_open()?;
        Ok(Box::new(ZenohClient {
            session: self.session.clone(),
            key_expr: to_key_expr(service).to_string(),
            timeout: self.rpc_timeout,
        }))
    }
}

fn serve_query(key_expr: &str, query: Query, handler: &RpcHandler) {
    let request = query
        .payload()
        .map(|p| p.to_bytes().into_owned())
        .unwrap_or_default();
    trace!("[RCFG-ZT] Request on {}: len={}", key_expr, request.len());

    let sent = match handler(&request) {
        Ok(response) => query.reply(key_expr.to_string(), response).wait(),
        Err(e) => {
            warn!("[RCFG-ZT] Request on {} failed: {}", key_expr, e);
            query.reply_err(e.to_string()).wait()
        }
    };
    if let Err(e) = sent {
        warn!("[RCFG-ZT] Reply on {} could not be sent: {}", key_expr, e);
    }
}

struct ZenohLatchedPublisher {
    publisher: Publisher<'static>,
    queryable: Queryable<()>,
    latched: Arc<Mutex<Option<Vec<u8>>>>,
    key_expr: String,
}

impl LatchedPublisher for ZenohLatchedPublisher {
    fn publish(&self, payload: Vec<u8>) -> Result<()> {
        // Hold the latch while publishing so a concurrent query never
        // answers with a value older than the last live sample.
        let mut latched = self.latched.lock();
        trace!(
            "[RCFG-ZT] Publishing {} bytes on {}",
            payload.len(),
            self.key_expr
        );
        self.publisher
            .put(payload.clone())
            .wait()
            .map_err(ReconfigureError::transport)?;
        *latched = Some(payload);
        Ok(())
    }

    fn undeclare(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.latched.lock().take();
        this.queryable
            .undeclare()
            .wait()
            .map_err(ReconfigureError::transport)?;
        this.publisher
            .undeclare()
            .wait()
            .map_err(ReconfigureError::transport)?;
        debug!("[RCFG-ZT] Latched publisher undeclared: {}", this.key_expr);
        Ok(())
    }
}

struct ZenohSubscription {
    subscriber: Subscriber<()>,
}

impl EndpointHandle for ZenohSubscription {
    fn undeclare(self: Box<Self>) -> Result<()> {
        self.subscriber
            .undeclare()
            .wait()
            .map_err(ReconfigureError::transport)
    }
}

struct ZenohService {
    queryable: Queryable<()>,
}

impl EndpointHandle for ZenohService {
    fn undeclare(self: Box<Self>) -> Result<()> {
        self.queryable
            .undeclare()
            .wait()
            .map_err(ReconfigureError::transport)
    }
}

/// Delivers the first reply and reports a failure if the query ends
/// without one.
struct ReplyOnce(Mutex<Option<ReplyCallback>>);

impl ReplyOnce {
    fn complete(&self, reply: Result<Vec<u8>>) {
        if let Some(on_reply) = self.0.lock().take() {
            on_reply(reply);
        }
    }
}

impl Drop for ReplyOnce {
    fn drop(&mut self) {
        if let Some(on_reply) = self.0.get_mut().take() {
            on_reply(Err(ReconfigureError::Transport(
                "no reply received".to_string(),
            )));
        }
    }
}

struct ZenohClient {
    session: Arc<Session>,
    key_expr: String,
    timeout: Duration,
}

impl RpcClient for ZenohClient {
    fn call(&self, request: Vec<u8>, on_reply: ReplyCallback) -> Result<()> {
        if self.session.is_closed() {
            return Err(ReconfigureError::NotConnected);
        }
        debug!(
            "[RCFG-ZT] Sending request to {}: len={}",
            self.key_expr,
            request.len()
        );

        let once = ReplyOnce(Mutex::new(Some(on_reply)));
        let ke = self.key_expr.clone();
        self.session
            .get(self.key_expr.clone())
            .payload(request)
            .timeout(self.timeout)
            .callback(move |reply| match reply.into_result() {
                Ok(sample) => {
                    trace!("[RCFG-ZT] Reply received from {}", ke);
                    once.complete(Ok(sample.payload().to_bytes().into_owned()));
                }
                Err(e) => {
                    let reason = e
                        .payload()
                        .try_to_string()
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| format!("{:?}", e));
                    once.complete(Err(ReconfigureError::Transport(reason)));
                }
            })
            .wait()
            .map_err(ReconfigureError::transport)
    }

    fn undeclare(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
