//! Wire format and the `Transport` abstraction (spec §6 "Wire format", §4.5).
//!
//! Payload messages between proxies are tagged `4 * cell_tag + k`, `k`
//! selecting which particle-of-kind payload the message carries. The `pcell`
//! tree-skeleton message (spec §4.5 step 1) is a separate, once-per-rebuild
//! exchange between a proxy pair and is not part of this per-cell tag space.
//! The core never looks inside a payload; it hands `Transport` a tag and an
//! opaque buffer and trusts the two ends agree on the encoding (spec: "a
//! real deployment would normalize; here we assume homogeneous nodes").

use cellmesh_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeResult;

/// One of the four payload kinds a message tag can carry (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Xv = 0,
    Rho = 1,
    Tend = 2,
    Gradient = 3,
}

impl WireKind {
    pub const ALL: [WireKind; 4] = [WireKind::Xv, WireKind::Rho, WireKind::Tend, WireKind::Gradient];

    fn from_k(k: u32) -> Option<WireKind> {
        match k {
            0 => Some(WireKind::Xv),
            1 => Some(WireKind::Rho),
            2 => Some(WireKind::Tend),
            3 => Some(WireKind::Gradient),
            _ => None,
        }
    }
}

/// `4 * cell_tag + k` (spec §6). The encoding is a clean fixed-radix split
/// so `cell_tag`/`kind` recover exactly what `payload` built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageTag(pub u32);

impl MessageTag {
    /// Reserved tag for the once-per-rebuild `pcell` tree-skeleton message
    /// (spec §4.5 step 1): one flows per proxy, not per cell, so it lives
    /// outside the `4*cell_tag+k` payload tag space entirely.
    pub const PCELL: MessageTag = MessageTag(u32::MAX);

    /// Reserved tag for a repartition pass's stray-batch message (spec
    /// §4.6 "invokes a full redistribution equivalent to the stray
    /// protocol but global"): one flows per repartition per destination
    /// node, likewise outside the per-cell payload tag space.
    pub const STRAYS: MessageTag = MessageTag(u32::MAX - 1);

    pub fn payload(cell_tag: u32, kind: WireKind) -> Self {
        MessageTag(4 * cell_tag + kind as u32)
    }

    pub fn cell_tag(self) -> u32 {
        self.0 / 4
    }

    pub fn kind(self) -> Option<WireKind> {
        WireKind::from_k(self.0 % 4)
    }
}

/// One message in flight between two proxies: a tag and an opaque,
/// already-encoded payload (spec §6: "packed arrays ... in the sender's
/// endianness").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub tag: MessageTag,
    pub payload: Vec<u8>,
}

/// The point-to-point exchange endpoint a proxy sends/receives through
/// (spec §4.3 "send/recv: fire an asynchronous point-to-point message").
/// Implementations: `local::LocalTransport` (in-process, for single-process
/// multi-node simulation and tests) and `grpc::GrpcTransport` (one
/// bidirectional stream per peer node).
pub trait Transport: Send + Sync {
    fn send(&self, to: NodeId, msg: WireMessage) -> ExchangeResult<()>;

    /// Non-blocking probe (spec §5 "a `recv` task ... polls with
    /// non-blocking probes and re-enqueues itself if the message is not
    /// ready"): `Ok(None)` means not-yet-arrived, not an error.
    fn try_recv(&self, tag: MessageTag) -> ExchangeResult<Option<WireMessage>>;
}
