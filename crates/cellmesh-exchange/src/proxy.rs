//! The `Proxy` record (spec §4.5): the communication endpoint bundling
//! everything this node exchanges with one peer node.

use cellmesh_types::{CellIndex, NodeId};

/// One peer relationship. `cells_out` are local top cells this node sends
/// particle payloads from; `cells_in` are the synthetic foreign cells
/// (built by `pcell::reconstruct_foreign_subtree`) this node reads into.
#[derive(Debug, Clone, Default)]
pub struct Proxy {
    pub peer: Option<NodeId>,
    pub cells_out: Vec<CellIndex>,
    pub cells_in: Vec<CellIndex>,
}

impl Proxy {
    pub fn new(peer: NodeId) -> Self {
        Self { peer: Some(peer), cells_out: Vec::new(), cells_in: Vec::new() }
    }
}

/// One proxy per peer node, indexed by `NodeId`. Built fresh whenever the
/// graph is rebuilt or a repartition changes cell ownership (spec §4.5
/// "Cell metadata ... exchanged whenever the graph is rebuilt").
#[derive(Debug, Clone, Default)]
pub struct ProxySet {
    proxies: Vec<Proxy>,
}

impl ProxySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proxy_for(&mut self, peer: NodeId) -> &mut Proxy {
        if let Some(pos) = self.proxies.iter().position(|p| p.peer == Some(peer)) {
            return &mut self.proxies[pos];
        }
        self.proxies.push(Proxy::new(peer));
        self.proxies.last_mut().expect("just pushed")
    }

    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.proxies.iter().filter_map(|p| p.peer)
    }

    pub fn get(&self, peer: NodeId) -> Option<&Proxy> {
        self.proxies.iter().find(|p| p.peer == Some(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_for_creates_then_reuses() {
        let mut set = ProxySet::new();
        set.proxy_for(NodeId(1)).cells_out.push(CellIndex(0));
        set.proxy_for(NodeId(1)).cells_out.push(CellIndex(1));
        assert_eq!(set.get(NodeId(1)).unwrap().cells_out.len(), 2);
        assert_eq!(set.peers().count(), 1);
    }
}
