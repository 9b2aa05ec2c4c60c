use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    buffer::{BufferCmd, Incoming, InboxSender},
    node::{NodeId, PortRef},
};

#[derive(Clone)]
struct Route {
    inbox: InboxSender,
    peer: PortRef,
}

#[derive(Default)]
struct Routes {
    by_src: HashMap<PortRef, Route>,
    inputs: HashMap<NodeId, BTreeSet<String>>,
}

/// Shared view of the link table used by running nodes to deliver buffers.
/// Written by the control task when links are created, read by node tasks.
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<RwLock<Routes>>,
}

impl Router {
    // A panicking node task must not take routing down with it.
    fn read(&self) -> RwLockReadGuard<'_, Routes> {
        self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Routes> {
        self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn connect(&self, src: PortRef, sink: PortRef, inbox: InboxSender) {
        let mut routes = self.write();
        routes
            .inputs
            .entry(sink.node)
            .or_default()
            .insert(sink.name.clone());
        routes.by_src.insert(src, Route { inbox, peer: sink });
    }

    pub(crate) fn clear(&self) {
        let mut routes = self.write();
        routes.by_src.clear();
        routes.inputs.clear();
    }

    fn route(&self, src: &PortRef) -> Option<Route> {
        let routes = self.read();
        routes.by_src.get(src).cloned()
    }

    /// Output ports of `node` that currently have a peer.
    pub fn linked_outputs(&self, node: NodeId) -> Vec<PortRef> {
        let routes = self.read();
        let mut ports: Vec<PortRef> = routes
            .by_src
            .keys()
            .filter(|p| p.node == node)
            .cloned()
            .collect();
        ports.sort();
        ports
    }

    /// Input ports of `node` that currently have a peer.
    pub fn linked_inputs(&self, node: NodeId) -> BTreeSet<String> {
        let routes = self.read();
        routes.inputs.get(&node).cloned().unwrap_or_default()
    }

    /// Delivers `cmd` to the peer of `src`, waiting for room in the peer's
    /// inbox. Returns false when `src` is not linked or the peer is gone.
    pub async fn push(&self, src: &PortRef, cmd: BufferCmd) -> bool {
        let Some(route) = self.route(src) else {
            log::trace!("push on unlinked port {}, dropped", src);
            return false;
        };
        route
            .inbox
            .send(Incoming {
                pad: route.peer.name,
                cmd,
            })
            .await
            .is_ok()
    }
}
