//! The boundary between this driver core and the underlying Matter SDK.
//!
//! Fabric management, PASE/CASE session establishment, and the wire/IP
//! transport are explicitly out of scope for this core (they are "provided
//! by the underlying Matter SDK", per the component's charter) — this module
//! defines the contract the core needs from that SDK rather than
//! implementing it. A production embedding wires a concrete
//! `MatterTransport` backed by the SDK's `ExchangeManager`/`ReadClient`/
//! `WriteClient`/`CommandSender`; this crate ships none here since that
//! glue lives with whichever SDK build is embedding this driver.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// An authenticated operational session to one node. Opaque to the core:
/// it is handed back unchanged to the transport on every call.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub fabric_index: u8,
    pub node_id: u64,
}

/// `(endpoint, cluster, attribute)` — the cache's and binding table's key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AttributePath {
    pub endpoint_id: u16,
    pub cluster_id: u32,
    pub attribute_id: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct EventPath {
    pub endpoint_id: u16,
    pub cluster_id: u32,
    pub event_id: u32,
}

#[derive(Clone, Debug)]
pub struct CommandRequest {
    pub endpoint_id: u16,
    pub cluster_id: u32,
    pub command_id: u32,
    pub timed_invoke_timeout_ms: Option<u16>,
    /// Pre-encoded TLV command-fields structure (a bare `{0x15, 0x18}` for a
    /// no-argument command, per `SendCommandFromTlv`).
    pub tlv_payload: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct CommandReply {
    /// `None` when the command's response carries no data.
    pub tlv_payload: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub path: AttributePath,
    pub tlv_payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug)]
pub struct SubscriptionIntervalSecs {
    pub min_interval_floor_secs: u16,
    pub max_interval_ceiling_secs: u16,
}

/// Callback surface the SDK drives as a subscription delivers data.
/// Mirrors `SubscribeInteraction::EventHandler` in the original: every
/// method has a no-op default so implementors only override what they need.
#[async_trait]
pub trait SubscriptionSink: Send + Sync {
    async fn on_subscription_established(&self, _subscription_id: u32) {}

    async fn on_attribute_changed(&self, _path: AttributePath, _tlv: Vec<u8>) {}

    async fn on_event(&self, _path: EventPath, _tlv: Vec<u8>) {}

    /// Transport-layer failure; the sink decides whether/when to
    /// resubscribe (see `subscription::SubscribeInteraction`).
    async fn on_resubscription_needed(&self, _reason: String) {}

    /// Terminal: the read client itself is done. No further callbacks
    /// follow.
    async fn on_done(&self) {}
}

/// A live subscription; dropping or cancelling tears down the read client.
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    async fn cancel(&self);
}

/// The contract this driver core needs from the embedding Matter SDK.
/// Implemented outside this crate; fabric/session/transport concerns are
/// the SDK's responsibility, not this core's.
#[async_trait]
pub trait MatterTransport: Send + Sync {
    async fn send_command(
        &self,
        session: &SessionHandle,
        req: CommandRequest,
    ) -> Result<CommandReply>;

    async fn send_write(&self, session: &SessionHandle, req: WriteRequest) -> Result<()>;

    async fn subscribe(
        &self,
        session: &SessionHandle,
        paths: &[AttributePath],
        events: &[EventPath],
        interval: SubscriptionIntervalSecs,
        sink: Arc<dyn SubscriptionSink>,
    ) -> Result<Arc<dyn SubscriptionHandle>>;

    /// Read a single attribute's `FeatureMap`, used to prime the script's
    /// feature-map table both at subscription-establish time and lazily on
    /// demand (`GetClusterFeatureMap`'s cache-miss path).
    async fn read_feature_map(&self, session: &SessionHandle, endpoint_id: u16, cluster_id: u32) -> Result<u32>;
}
