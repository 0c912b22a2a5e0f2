//! Service bus
//!
//! Routes service calls to the entities they target. Group dispatchers sit
//! on top of this as ordinary callers, and both groups and virtual lights
//! hang off it as [`ServiceHandler`]s, so a group forwarding to members
//! that are themselves groups needs no special casing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::light::ATTR_ENTITY_ID;
use crate::light::LIGHT_DOMAIN;

/// JSON object payload carried by a service call.
pub type ServiceData = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("unsupported service domain '{0}'")]
    UnknownDomain(String),

    #[error("service call to '{entity_id}' failed: {source}")]
    Handler {
        entity_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Issues a service call and waits until it has been fanned out to every
/// target entity.
#[async_trait]
pub trait CommandBus: Send + Sync {
    async fn invoke(&self, domain: &str, service: &str, data: ServiceData) -> Result<(), BusError>;
}

/// An entity that can be targeted by service calls.
///
/// `data` arrives with the routing key already stripped; handlers only see
/// the payload meant for them.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle_service(&self, service: &str, data: &ServiceData) -> anyhow::Result<()>;
}

/// In-process [`CommandBus`] with a registry of handlers per entity id.
pub struct ServiceBus {
    handlers: RwLock<HashMap<String, Arc<dyn ServiceHandler>>>,
}

impl ServiceBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Attach `handler` as the recipient of calls targeting `entity_id`.
    /// A second registration for the same id replaces the first.
    pub fn register(&self, entity_id: &str, handler: Arc<dyn ServiceHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(entity_id.to_string(), handler);
        }
    }

    /// Detach the handler for `entity_id`, if any.
    pub fn unregister(&self, entity_id: &str) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.remove(entity_id);
        }
    }

    fn lookup(&self, entity_id: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(entity_id).cloned())
    }
}

impl Default for ServiceBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the target list out of `data`, accepting both a single string and
/// a list of strings, and leave only the per-entity payload behind.
fn take_targets(data: &mut ServiceData) -> Vec<String> {
    match data.remove(ATTR_ENTITY_ID) {
        Some(Value::String(id)) => vec![id],
        Some(Value::Array(ids)) => ids
            .into_iter()
            .filter_map(|id| match id {
                Value::String(id) => Some(id),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl CommandBus for ServiceBus {
    async fn invoke(
        &self,
        domain: &str,
        service: &str,
        mut data: ServiceData,
    ) -> Result<(), BusError> {
        if domain != LIGHT_DOMAIN {
            return Err(BusError::UnknownDomain(domain.to_string()));
        }

        let targets = take_targets(&mut data);
        if targets.is_empty() {
            debug!("bus: {}.{} with no targets, nothing to do", domain, service);
            return Ok(());
        }

        // Resolve handlers before awaiting anything; the registry lock must
        // not be held across handler calls.
        let resolved: Vec<(String, Option<Arc<dyn ServiceHandler>>)> = targets
            .into_iter()
            .map(|id| {
                let handler = self.lookup(&id);
                (id, handler)
            })
            .collect();

        for (entity_id, handler) in resolved {
            let Some(handler) = handler else {
                warn!("bus: no handler for {}, skipping", entity_id);
                continue;
            };
            debug!("bus: {}.{} -> {}", domain, service, entity_id);
            handler
                .handle_service(service, &data)
                .await
                .map_err(|source| BusError::Handler { entity_id, source })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use serde_json::json;

    /// Handler that records every call it receives.
    struct Recorder {
        calls: Mutex<Vec<(String, ServiceData)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, ServiceData)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ServiceHandler for Recorder {
        async fn handle_service(&self, service: &str, data: &ServiceData) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((service.to_string(), data.clone()));
            Ok(())
        }
    }

    struct Exploder;

    #[async_trait]
    impl ServiceHandler for Exploder {
        async fn handle_service(&self, _service: &str, _data: &ServiceData) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn data(value: serde_json::Value) -> ServiceData {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn routes_to_every_target_without_the_routing_key() {
        let bus = ServiceBus::new();
        let first = Recorder::new();
        let second = Recorder::new();
        bus.register("light.one", first.clone());
        bus.register("light.two", second.clone());

        bus.invoke(
            "light",
            "turn_on",
            data(json!({"entity_id": ["light.one", "light.two"], "brightness": 150})),
        )
        .await
        .unwrap();

        for recorder in [&first, &second] {
            let calls = recorder.calls();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, "turn_on");
            assert_eq!(calls[0].1, data(json!({"brightness": 150})));
        }
    }

    #[tokio::test]
    async fn accepts_a_single_target_string() {
        let bus = ServiceBus::new();
        let recorder = Recorder::new();
        bus.register("light.one", recorder.clone());

        bus.invoke("light", "turn_off", data(json!({"entity_id": "light.one"})))
            .await
            .unwrap();

        assert_eq!(recorder.calls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_targets_are_skipped() {
        let bus = ServiceBus::new();
        let recorder = Recorder::new();
        bus.register("light.known", recorder.clone());

        bus.invoke(
            "light",
            "turn_on",
            data(json!({"entity_id": ["light.ghost", "light.known"]})),
        )
        .await
        .unwrap();

        assert_eq!(recorder.calls().len(), 1);
    }

    #[tokio::test]
    async fn no_targets_is_a_no_op() {
        let bus = ServiceBus::new();
        bus.invoke("light", "turn_on", ServiceData::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_foreign_domains() {
        let bus = ServiceBus::new();
        let err = bus
            .invoke("switch", "turn_on", ServiceData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownDomain(domain) if domain == "switch"));
    }

    #[tokio::test]
    async fn handler_failures_carry_the_entity_id() {
        let bus = ServiceBus::new();
        bus.register("light.bad", Arc::new(Exploder));

        let err = bus
            .invoke("light", "turn_on", data(json!({"entity_id": "light.bad"})))
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Handler { entity_id, .. } if entity_id == "light.bad"));
    }

    #[tokio::test]
    async fn unregister_detaches_the_handler() {
        let bus = ServiceBus::new();
        let recorder = Recorder::new();
        bus.register("light.one", recorder.clone());
        bus.unregister("light.one");

        bus.invoke("light", "turn_on", data(json!({"entity_id": "light.one"})))
            .await
            .unwrap();

        assert!(recorder.calls().is_empty());
    }
}
