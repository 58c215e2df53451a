//! Desired-subscription-set management and frame building.
//!
//! The manager owns the intended subscription state — per channel, the set
//! of product ids. The transport reconciles the exchange's view to it on
//! every (re)connect by replaying subscribe frames for the full set.
//!
//! Both `subscribe` and `unsubscribe` are idempotent: they return only the
//! products whose membership actually changed, so a no-op call produces no
//! frames.

use std::collections::BTreeSet;

use ahash::AHashMap;

use cx_core::types::Channel;

/// Frame operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubOp {
    Subscribe,
    Unsubscribe,
}

impl SubOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// One pending frame: operation, channel, and the products it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSpec {
    pub op: SubOp,
    pub channel: Channel,
    pub products: Vec<String>,
}

/// Owns the desired `(product, channel)` set.
pub struct SubscriptionManager {
    channels: Vec<Channel>,
    // BTreeSet keeps frame product order deterministic.
    desired: AHashMap<Channel, BTreeSet<String>>,
}

impl SubscriptionManager {
    /// Create a manager covering the given channels (both, by default).
    pub fn new(channels: Vec<Channel>) -> Self {
        let channels = if channels.is_empty() { Channel::ALL.to_vec() } else { channels };
        let mut desired = AHashMap::new();
        for &channel in &channels {
            desired.insert(channel, BTreeSet::new());
        }
        Self { channels, desired }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Current desired products for a channel, sorted.
    pub fn desired(&self, channel: Channel) -> Vec<String> {
        self.desired
            .get(&channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add products to the desired set. Returns one subscribe frame per
    /// channel covering the products that were actually new; empty when
    /// everything was already subscribed.
    pub fn subscribe(&mut self, products: &[String]) -> Vec<FrameSpec> {
        let mut frames = Vec::new();
        for &channel in &self.channels {
            let set = self.desired.entry(channel).or_default();
            let added: Vec<String> =
                products.iter().filter(|p| set.insert((*p).clone())).cloned().collect();
            if !added.is_empty() {
                frames.push(FrameSpec { op: SubOp::Subscribe, channel, products: added });
            }
        }
        frames
    }

    /// Remove products from the desired set. Returns one unsubscribe frame
    /// per channel covering the products that were actually present.
    pub fn unsubscribe(&mut self, products: &[String]) -> Vec<FrameSpec> {
        let mut frames = Vec::new();
        for &channel in &self.channels {
            let Some(set) = self.desired.get_mut(&channel) else {
                continue;
            };
            let removed: Vec<String> =
                products.iter().filter(|p| set.remove(*p)).cloned().collect();
            if !removed.is_empty() {
                frames.push(FrameSpec { op: SubOp::Unsubscribe, channel, products: removed });
            }
        }
        frames
    }

    /// Subscribe frames for the full desired set — sent after every
    /// successful handshake. Channels with no products emit nothing.
    pub fn replay_frames(&self) -> Vec<FrameSpec> {
        let mut frames = Vec::new();
        for &channel in &self.channels {
            let products = self.desired(channel);
            if !products.is_empty() {
                frames.push(FrameSpec { op: SubOp::Subscribe, channel, products });
            }
        }
        frames
    }
}

/// Render one frame to wire JSON with a freshly signed token.
pub fn build_frame(spec: &FrameSpec, jwt: &str) -> String {
    serde_json::json!({
        "type": spec.op.as_str(),
        "product_ids": spec.products,
        "channel": spec.channel.as_str(),
        "jwt": jwt,
    })
    .to_string()
}
