//! In-process transport (spec §4.5): a shared mailbox keyed by `(node, tag)`
//! used to simulate multiple nodes inside a single process, and by tests
//! that don't want to spin up gRPC.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use cellmesh_types::NodeId;
use parking_lot::Mutex;

use crate::error::ExchangeResult;
use crate::wire::{MessageTag, Transport, WireMessage};

type Mailboxes = Mutex<HashMap<(NodeId, MessageTag), VecDeque<WireMessage>>>;

/// The shared fabric every `LocalTransport` handle posts into and drains
/// from. One `LocalNetwork` stands in for the whole MPI-style process group
/// in single-process tests and simulations.
#[derive(Default)]
pub struct LocalNetwork {
    mailboxes: Mailboxes,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// A `Transport` bound to one node's view of a `LocalNetwork`: `send` posts
/// into the recipient's mailbox, `try_recv` drains this node's own.
pub struct LocalTransport {
    network: Arc<LocalNetwork>,
    node: NodeId,
}

impl LocalTransport {
    pub fn new(network: Arc<LocalNetwork>, node: NodeId) -> Self {
        Self { network, node }
    }
}

impl Transport for LocalTransport {
    fn send(&self, to: NodeId, msg: WireMessage) -> ExchangeResult<()> {
        self.network
            .mailboxes
            .lock()
            .entry((to, msg.tag))
            .or_default()
            .push_back(msg);
        Ok(())
    }

    fn try_recv(&self, tag: MessageTag) -> ExchangeResult<Option<WireMessage>> {
        Ok(self
            .network
            .mailboxes
            .lock()
            .get_mut(&(self.node, tag))
            .and_then(|q| q.pop_front()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireKind;

    #[test]
    fn message_arrives_at_recipient_only() {
        let net = LocalNetwork::new();
        let a = LocalTransport::new(net.clone(), NodeId(0));
        let b = LocalTransport::new(net.clone(), NodeId(1));

        let tag = MessageTag::payload(3, WireKind::Rho);
        a.send(NodeId(1), WireMessage { tag, payload: vec![1, 2, 3] }).unwrap();

        assert!(a.try_recv(tag).unwrap().is_none());
        let got = b.try_recv(tag).unwrap().expect("message should have arrived");
        assert_eq!(got.payload, vec![1, 2, 3]);
        assert!(b.try_recv(tag).unwrap().is_none());
    }

    #[test]
    fn fifo_order_preserved_per_tag() {
        let net = LocalNetwork::new();
        let a = LocalTransport::new(net.clone(), NodeId(0));
        let b = LocalTransport::new(net.clone(), NodeId(1));
        let tag = MessageTag::payload(1, WireKind::Xv);

        for i in 0..5u8 {
            a.send(NodeId(1), WireMessage { tag, payload: vec![i] }).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(b.try_recv(tag).unwrap().unwrap().payload, vec![i]);
        }
        assert!(b.try_recv(tag).unwrap().is_none());
    }
}
