//! In-process transport. Calls go straight into the target's [`Handler`] on
//! the caller's thread, with optional random latency and per-link failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::{Ack, Grant, Handler, NodeId, Peer, PeerDirectory, Request};
use crate::config::NodeConfig;
use crate::error::{Result, TransportError};
use crate::sync::ricart_agrawala::Node;

#[derive(Default)]
pub struct LocalNetwork {
    // Weak: every node already owns handles that point back here
    handlers: RwLock<HashMap<NodeId, Weak<dyn Handler>>>,
    down: RwLock<HashSet<(NodeId, NodeId)>>,
    max_latency: Duration,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(max_latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            max_latency,
            ..Self::default()
        })
    }

    /// Build one engine per config, attach them all, then register every
    /// node with every other by name.
    pub fn cluster(
        self: &Arc<Self>,
        configs: impl IntoIterator<Item = NodeConfig>,
    ) -> Result<Vec<Arc<Node>>> {
        let nodes = configs
            .into_iter()
            .map(|cfg| Arc::new(Node::new(cfg)))
            .collect::<Vec<_>>();
        for node in &nodes {
            self.attach(node);
        }
        let ids = nodes.iter().map(|n| n.id().clone()).collect::<Vec<_>>();
        for node in &nodes {
            node.connect(self.directory(node.id(), &ids)?)?;
        }
        Ok(nodes)
    }

    pub fn attach<H: Handler + 'static>(&self, handler: &Arc<H>) {
        let handler: Arc<dyn Handler> = handler.clone();
        write(&self.handlers).insert(handler.id().clone(), Arc::downgrade(&handler));
    }

    pub fn peer(self: &Arc<Self>, from: &NodeId, to: &NodeId) -> Arc<dyn Peer> {
        Arc::new(LocalPeer {
            net: self.clone(),
            from: from.clone(),
            to: to.clone(),
        })
    }

    pub fn directory(self: &Arc<Self>, own: &NodeId, ids: &[NodeId]) -> Result<PeerDirectory> {
        let mut dir = PeerDirectory::new(own.clone());
        for id in ids.iter().filter(|id| *id != own) {
            dir.register(self.peer(own, id))?;
        }
        Ok(dir)
    }

    /// Fail every call between `a` and `b`, in both directions.
    pub fn disconnect(&self, a: &NodeId, b: &NodeId) {
        let mut down = write(&self.down);
        down.insert((a.clone(), b.clone()));
        down.insert((b.clone(), a.clone()));
    }

    pub fn reconnect(&self, a: &NodeId, b: &NodeId) {
        let mut down = write(&self.down);
        down.remove(&(a.clone(), b.clone()));
        down.remove(&(b.clone(), a.clone()));
    }

    fn route(&self, from: &NodeId, to: &NodeId) -> Result<Arc<dyn Handler>, TransportError> {
        if read(&self.down).contains(&(from.clone(), to.clone())) {
            return Err(TransportError::Disconnected {
                from: from.clone(),
                to: to.clone(),
            });
        }
        let handler = read(&self.handlers)
            .get(to)
            .and_then(Weak::upgrade)
            .ok_or_else(|| TransportError::Unreachable(to.clone()))?;
        self.delay();
        Ok(handler)
    }

    fn delay(&self) {
        if self.max_latency.is_zero() {
            return;
        }
        let ms = rand::thread_rng().gen_range(0..=self.max_latency.as_millis() as u64);
        std::thread::sleep(Duration::from_millis(ms));
    }
}

struct LocalPeer {
    net: Arc<LocalNetwork>,
    from: NodeId,
    to: NodeId,
}

impl Peer for LocalPeer {
    fn name(&self) -> Result<NodeId, TransportError> {
        Ok(self.net.route(&self.from, &self.to)?.id().clone())
    }

    fn request(&self, req: &Request) -> Result<Ack, TransportError> {
        let handler = self.net.route(&self.from, &self.to)?;
        handler
            .on_request(req.clone())
            .map_err(|e| self.rejected(e))
    }

    fn reply(&self, grant: &Grant) -> Result<(), TransportError> {
        let handler = self.net.route(&self.from, &self.to)?;
        handler.on_reply(grant.clone()).map_err(|e| self.rejected(e))
    }
}

impl LocalPeer {
    fn rejected(&self, e: crate::Error) -> TransportError {
        debug!(from = %self.from, to = %self.to, "message rejected: {e}");
        TransportError::Rejected {
            peer: self.to.clone(),
            reason: e.to_string(),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::LocalNetwork;
    use crate::error::TransportError;
    use crate::transport::{Ack, Grant, NodeId, Request};
    use crate::NodeConfig;

    #[test]
    fn routes_to_attached_handler() {
        let net = LocalNetwork::new();
        let nodes = net
            .cluster(["a", "b"].map(NodeConfig::new))
            .unwrap();
        let (a, b) = (nodes[0].id().clone(), nodes[1].id().clone());

        let peer = net.peer(&a, &b);
        assert_eq!(peer.name().unwrap(), b);
        assert!(matches!(
            peer.request(&Request::new(1, a.clone())).unwrap(),
            Ack::Granted(_)
        ));
    }

    #[test]
    fn disconnected_link_fails_both_ways() {
        let net = LocalNetwork::new();
        let _nodes = net.cluster(["a", "b"].map(NodeConfig::new)).unwrap();
        let (a, b) = (NodeId::from("a"), NodeId::from("b"));

        net.disconnect(&a, &b);
        assert!(matches!(
            net.peer(&a, &b).request(&Request::new(1, a.clone())),
            Err(TransportError::Disconnected { .. })
        ));
        assert!(net.peer(&b, &a).name().is_err());

        net.reconnect(&a, &b);
        assert!(net.peer(&b, &a).name().is_ok());
    }

    #[test]
    fn refused_reply_is_reported() {
        let net = LocalNetwork::new();
        let _nodes = net.cluster(["a", "b"].map(NodeConfig::new)).unwrap();
        let (a, b) = (NodeId::from("a"), NodeId::from("b"));

        // b has no open round, so the grant is stale
        let grant = Grant {
            timestamp: 3,
            granter: a.clone(),
            round: 1,
        };
        assert!(matches!(
            net.peer(&a, &b).reply(&grant),
            Err(TransportError::Rejected { peer, .. }) if peer == b
        ));
        assert!(matches!(
            net.peer(&a, &b).request(&Request::new(u64::MAX, a.clone())),
            Err(TransportError::Rejected { .. })
        ));
    }

    #[test]
    fn dropped_node_is_unreachable() {
        let net = LocalNetwork::new();
        let mut nodes = net.cluster(["a", "b"].map(NodeConfig::new)).unwrap();
        nodes.pop();
        assert_eq!(
            net.peer(&NodeId::from("a"), &NodeId::from("b")).name(),
            Err(TransportError::Unreachable(NodeId::from("b")))
        );
    }
}
