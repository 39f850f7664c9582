//! In-process transport.
//!
//! Every endpoint created from clones of one `LocalTransport` shares the
//! same bus. Deliveries on a topic are serialized by a per-topic lock, so a
//! handler must not publish on the topic it is subscribed to.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{ReconfigureError, Result};
use crate::transport::{
    EndpointHandle, LatchedPublisher, PayloadHandler, ReplyCallback, RpcClient, RpcHandler,
    Transport,
};

#[derive(Default)]
struct TopicSlot {
    latched: Option<Vec<u8>>,
    subscribers: HashMap<usize, PayloadHandler>,
}

#[derive(Default)]
struct LocalBus {
    closed: AtomicBool,
    next_id: AtomicUsize,
    topics: Mutex<HashMap<String, Arc<Mutex<TopicSlot>>>>,
    services: Mutex<HashMap<String, RpcHandler>>,
}

impl LocalBus {
    fn slot(&self, topic: &str) -> Arc<Mutex<TopicSlot>> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ReconfigureError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Default)]
pub struct LocalTransport {
    bus: Arc<LocalBus>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disconnect the bus. Existing endpoints stop delivering and new ones
    /// fail with `NotConnected`.
    pub fn shutdown(&self) {
        self.bus.closed.store(true, Ordering::Release);
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.bus
            .topics
            .lock()
            .get(topic)
            .map(|slot| slot.lock().subscribers.len())
            .unwrap_or(0)
    }

    pub fn is_served(&self, service: &str) -> bool {
        self.bus.services.lock().contains_key(service)
    }

    /// Last latched payload on `topic`, if any.
    pub fn latched(&self, topic: &str) -> Option<Vec<u8>> {
        self.bus
            .topics
            .lock()
            .get(topic)
            .and_then(|slot| slot.lock().latched.clone())
    }
}

impl Transport for LocalTransport {
    fn is_connected(&self) -> bool {
        !self.bus.closed.load(Ordering::Acquire)
    }

    fn advertise_latched(&self, topic: &str) -> Result<Box<dyn LatchedPublisher>> {
        self.bus.ensure_open()?;
        debug!("[LOCAL] Publisher ready: topic={}", topic);
        Ok(Box::new(LocalPublisher {
            bus: self.bus.clone(),
            slot: self.bus.slot(topic),
            topic: topic.to_string(),
        }))
    }

    fn subscribe(&self, topic: &str, handler: PayloadHandler) -> Result<Box<dyn EndpointHandle>> {
        self.bus.ensure_open()?;
        let id = self.bus.next_id.fetch_add(1, Ordering::AcqRel);
        let slot = self.bus.slot(topic);
        {
            let mut guard = slot.lock();
            if let Some(latched) = &guard.latched {
                trace!("[LOCAL] Replaying latched sample on {}", topic);
                handler(latched);
            }
            guard.subscribers.insert(id, handler);
        }
        debug!("[LOCAL] Subscriber ready: topic={}", topic);
        Ok(Box::new(LocalSubscription { slot, id }))
    }

    fn serve(&self, service: &str, handler: RpcHandler) -> Result<Box<dyn EndpointHandle>> {
        self.bus.ensure_open()?;
        let mut services = self.bus.services.lock();
        if services.contains_key(service) {
            return Err(ReconfigureError::Transport(format!(
                "service {} is already served",
                service
            )));
        }
        services.insert(service.to_string(), handler);
        debug!("[LOCAL] Server ready: service={}", service);
        Ok(Box::new(LocalService {
            bus: self.bus.clone(),
            service: service.to_string(),
        }))
    }

    fn client(&self, service: &str) -> Result<Box<dyn RpcClient>> {
        self.bus.ensure_open()?;
        Ok(Box::new(LocalClient {
            bus: self.bus.clone(),
            service: service.to_string(),
        }))
    }
}

struct LocalPublisher {
    bus: Arc<LocalBus>,
    slot: Arc<Mutex<TopicSlot>>,
    topic: String,
}

impl LatchedPublisher for LocalPublisher {
    fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.bus.ensure_open()?;
        let mut guard = self.slot.lock();
        trace!(
            "[LOCAL] Publishing {} bytes to {} subscriber(s) on {}",
            payload.len(),
            guard.subscribers.len(),
            self.topic
        );
        for handler in guard.subscribers.values() {
            handler(&payload);
        }
        guard.latched = Some(payload);
        Ok(())
    }

    fn undeclare(self: Box<Self>) -> Result<()> {
        self.slot.lock().latched = None;
        debug!("[LOCAL] Publisher undeclared: topic={}", self.topic);
        Ok(())
    }
}

struct LocalSubscription {
    slot: Arc<Mutex<TopicSlot>>,
    id: usize,
}

impl EndpointHandle for LocalSubscription {
    fn undeclare(self: Box<Self>) -> Result<()> {
        self.slot.lock().subscribers.remove(&self.id);
        Ok(())
    }
}

struct LocalService {
    bus: Arc<LocalBus>,
    service: String,
}

impl EndpointHandle for LocalService {
    fn undeclare(self: Box<Self>) -> Result<()> {
        self.bus.services.lock().remove(&self.service);
        debug!("[LOCAL] Server undeclared: service={}", self.service);
        Ok(())
    }
}

struct LocalClient {
    bus: Arc<LocalBus>,
    service: String,
}

impl RpcClient for LocalClient {
    fn call(&self, request: Vec<u8>, on_reply: ReplyCallback) -> Result<()> {
        self.bus.ensure_open()?;
        let handler = self.bus.services.lock().get(&self.service).cloned();
        let service = self.service.clone();

        std::thread::Builder::new()
            .name("rcfg-local-rpc".to_string())
            .spawn(move || {
                let reply = match handler {
                    Some(handler) => handler(&request),
                    None => {
                        warn!("[LOCAL] No server for {}", service);
                        Err(ReconfigureError::Transport(format!(
                            "no server available for {}",
                            service
                        )))
                    }
                };
                on_reply(reply);
            })
            .map_err(ReconfigureError::transport)?;
        Ok(())
    }

    fn undeclare(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
