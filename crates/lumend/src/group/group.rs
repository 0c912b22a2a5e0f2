//! Group actor
//!
//! Each configured group runs as one task owning its member list. The task
//! reacts to store notifications by recomputing and republishing the
//! composite state, and to service requests by sanitizing the payload and
//! issuing a single bus call. Both paths run on the same loop, so one
//! group's recompute and dispatch never race each other.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::dispatch::build_service_data;
use super::dispatch::DispatchError;
use super::merge::merge_composite;
use crate::bus::CommandBus;
use crate::bus::ServiceData;
use crate::bus::ServiceHandler;
use crate::light::PowerState;
use crate::light::ServiceKind;
use crate::light::LIGHT_DOMAIN;
use crate::store::StateStore;

/// One queued composite command, answered through `reply` once the
/// downstream call has completed.
struct ServiceRequest {
    kind: ServiceKind,
    data: ServiceData,
    reply: oneshot::Sender<Result<(), DispatchError>>,
}

/// A virtual composite light over a fixed set of member entities.
pub struct LightGroup {
    entity_id: String,
    name: String,
    member_ids: Vec<String>,
    store: Arc<StateStore>,
    bus: Arc<dyn CommandBus>,
}

impl LightGroup {
    /// Duplicate member ids are collapsed, keeping first occurrence order.
    pub fn new(
        entity_id: impl Into<String>,
        name: impl Into<String>,
        members: Vec<String>,
        store: Arc<StateStore>,
        bus: Arc<dyn CommandBus>,
    ) -> Self {
        let mut member_ids: Vec<String> = Vec::with_capacity(members.len());
        for id in members {
            if !member_ids.contains(&id) {
                member_ids.push(id);
            }
        }
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            member_ids,
            store,
            bus,
        }
    }

    /// Start the actor task. The composite state appears in the store as
    /// soon as the task has run its initial recompute.
    pub fn spawn(self) -> (GroupHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = GroupHandle {
            entity_id: self.entity_id.clone(),
            store: self.store.clone(),
            tx,
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(self, mut requests: mpsc::UnboundedReceiver<ServiceRequest>) {
        // Subscribe before the first recompute: a member update landing in
        // between is then either visible in the snapshot or queued as a
        // notification, never lost.
        let mut changes = self.store.subscribe();
        self.recompute();
        info!(
            "group {} ('{}') serving {} member(s)",
            self.entity_id,
            self.name,
            self.member_ids.len()
        );

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                change = changes.recv() => match change {
                    Some(change) => {
                        if self.member_ids.iter().any(|id| *id == change.entity_id) {
                            self.recompute();
                        }
                    }
                    None => break,
                },
            }
        }

        info!("group {} stopped", self.entity_id);
    }

    /// Fold the current member snapshots into a fresh composite state and
    /// publish it.
    fn recompute(&self) {
        let snapshot = self.store.snapshot();
        let composite = merge_composite(&self.member_ids, &snapshot);
        debug!(
            "group {}: recomputed composite, power {}",
            self.entity_id, composite.power
        );
        self.store.set(&self.entity_id, composite);
    }

    async fn handle_request(&self, request: ServiceRequest) {
        let result = self.dispatch(request.kind, &request.data).await;
        if request.reply.send(result).is_err() {
            warn!(
                "group {}: caller went away before the reply",
                self.entity_id
            );
        }
    }

    /// Sanitize the payload for `kind` and issue exactly one bus call
    /// naming all members. Dispatch never touches the composite state;
    /// that catches up when member notifications come back.
    async fn dispatch(&self, kind: ServiceKind, data: &ServiceData) -> Result<(), DispatchError> {
        let payload = build_service_data(kind, data, &self.member_ids);
        debug!(
            "group {}: forwarding {} to {} member(s)",
            self.entity_id,
            kind,
            self.member_ids.len()
        );
        self.bus.invoke(LIGHT_DOMAIN, &kind.to_string(), payload).await?;
        Ok(())
    }
}

/// Cloneable handle to a running [`LightGroup`] actor.
#[derive(Clone)]
pub struct GroupHandle {
    entity_id: String,
    store: Arc<StateStore>,
    tx: mpsc::UnboundedSender<ServiceRequest>,
}

impl GroupHandle {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Issue a composite command and wait for the downstream call to
    /// complete.
    ///
    /// `toggle` is resolved here against the current composite power into
    /// an explicit `turn_on` or `turn_off` with an empty payload; the actor
    /// itself only ever dispatches explicit kinds.
    pub async fn call(&self, kind: ServiceKind, data: ServiceData) -> Result<(), DispatchError> {
        let (kind, data) = match kind {
            ServiceKind::Toggle => {
                let is_on = self
                    .store
                    .get(&self.entity_id)
                    .map(|state| state.power == PowerState::On)
                    .unwrap_or(false);
                let resolved = if is_on {
                    ServiceKind::TurnOff
                } else {
                    ServiceKind::TurnOn
                };
                (resolved, ServiceData::new())
            }
            explicit => (explicit, data),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ServiceRequest {
            kind,
            data,
            reply: reply_tx,
        };
        self.tx
            .send(request)
            .map_err(|_| DispatchError::Closed(self.entity_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| DispatchError::Closed(self.entity_id.clone()))?
    }
}

#[async_trait]
impl ServiceHandler for GroupHandle {
    async fn handle_service(&self, service: &str, data: &ServiceData) -> anyhow::Result<()> {
        let kind: ServiceKind = service
            .parse()
            .map_err(|_| DispatchError::InvalidKind(service.to_string()))?;
        self.call(kind, data.clone()).await?;
        Ok(())
    }
}
