use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::{InboxReceiver, InboxSender},
    bus::{Bus, BusPoster, Message, State},
    caps::Caps,
    element::run_element,
    error::{Error, Result},
    node::{Behavior, Direction, Node, NodeId, NodeKind, Port, PortRef},
    router::Router,
    source::{DiscoveryReceiver, DiscoverySender, SourceContext, run_source},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub src: PortRef,
    pub sink: PortRef,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// One of the two ports already has a peer. Nothing was changed.
    AlreadyLinked,
    /// Caps, directions or ports do not fit. Nothing was changed.
    Incompatible,
}

/// How long [`Graph::shutdown`] waits for node tasks to go idle.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Owner of all nodes, ports and links of one pipeline.
///
/// The graph is built and mutated from a single control task. Running nodes
/// only see the [`Router`], the bus poster and the discovery sender.
pub struct Graph {
    name: String,
    nodes: Vec<Node>,
    by_name: HashMap<String, NodeId>,
    links: Vec<Link>,
    inboxes: HashMap<NodeId, InboxSender>,
    pending_inboxes: HashMap<NodeId, InboxReceiver>,
    router: Router,
    bus: Option<Bus>,
    poster: BusPoster,
    discovery_tx: DiscoverySender,
    discovery_rx: Option<DiscoveryReceiver>,
    state: State,
    sealed: bool,
    torn_down: bool,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Graph {
    pub fn new(name: &str) -> Self {
        let bus = Bus::new(name);
        let poster = bus.poster();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            by_name: HashMap::new(),
            links: Vec::new(),
            inboxes: HashMap::new(),
            pending_inboxes: HashMap::new(),
            router: Router::default(),
            bus: Some(bus),
            poster,
            discovery_tx,
            discovery_rx: Some(discovery_rx),
            state: State::Null,
            sealed: false,
            torn_down: false,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The diagnostics bus. Can be taken once.
    pub fn take_bus(&mut self) -> Option<Bus> {
        self.bus.take()
    }

    /// Receiver of source discovery events. Can be taken once.
    pub fn take_discovery(&mut self) -> Option<DiscoveryReceiver> {
        self.discovery_rx.take()
    }

    pub fn add(&mut self, node: Node) -> Result<NodeId> {
        if self.sealed {
            return Err(Error::ConstructionFailure(format!(
                "{} is shut down, cannot add {}",
                self.name,
                node.name()
            )));
        }
        if self.by_name.contains_key(node.name()) {
            return Err(Error::ConstructionFailure(format!(
                "a node named {} already exists",
                node.name()
            )));
        }
        let id = NodeId(self.nodes.len());
        // Sources drive themselves and have no inputs.
        if node.kind() != NodeKind::Source {
            let (tx, rx) = mpsc::channel(node.inbox_capacity());
            self.inboxes.insert(id, tx);
            self.pending_inboxes.insert(id, rx);
        }
        self.by_name.insert(node.name().to_string(), id);
        self.nodes.push(node);
        Ok(id)
    }

    pub fn add_many(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<Vec<NodeId>> {
        nodes.into_iter().map(|node| self.add(node)).collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn lookup(&self, name: &str) -> Result<NodeId> {
        self.node_id(name).ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn port(&self, port: &PortRef) -> Option<&Port> {
        self.node(port.node)?.port(&port.name)
    }

    fn port_mut(&mut self, port: &PortRef) -> Option<&mut Port> {
        self.nodes.get_mut(port.node.0)?.port_mut(&port.name)
    }

    pub fn is_linked(&self, port: &PortRef) -> bool {
        self.port(port).is_some_and(Port::is_linked)
    }

    fn node_name(&self, id: NodeId) -> String {
        self.node(id)
            .map(|n| n.name().to_string())
            .unwrap_or_else(|| format!("#{}", id.0))
    }

    /// Human readable `node:port`.
    pub fn describe(&self, port: &PortRef) -> String {
        format!("{}:{}", self.node_name(port.node), port.name)
    }

    /// Reference to a port that exists for the node's whole lifetime.
    pub fn static_port(&self, node: NodeId, name: &str) -> Result<PortRef> {
        match self.node(node).and_then(|n| n.port(name)) {
            Some(port) if port.is_static() => Ok(PortRef::new(node, name)),
            _ => Err(Error::PortNotFound {
                node: self.node_name(node),
                port: name.to_string(),
            }),
        }
    }

    /// Requests a new port from a request template (`src_%u` on a branch
    /// point, `audio_%u` on a muxer). Fails at once if the node has no such
    /// template or its limit is reached.
    pub fn request_port(&mut self, node: NodeId, template: &str) -> Result<PortRef> {
        let node_name = self.node_name(node);
        let target = self.nodes.get_mut(node.0).ok_or_else(|| Error::RequestRejected {
            node: node_name.clone(),
            template: template.to_string(),
            reason: "no such node".to_string(),
        })?;
        let name = target
            .request_port(template)
            .map_err(|reason| Error::RequestRejected {
                node: node_name.clone(),
                template: template.to_string(),
                reason,
            })?;
        log::debug!("{}: requested port {}", node_name, name);
        Ok(PortRef::new(node, name))
    }

    /// Materializes a port a source discovered. Exposing an existing name
    /// returns the existing port.
    pub fn expose_port(
        &mut self,
        node: NodeId,
        name: &str,
        caps: Option<Caps>,
    ) -> Result<PortRef> {
        let node_name = self.node_name(node);
        let target = self
            .nodes
            .get_mut(node.0)
            .ok_or_else(|| Error::NodeNotFound(node_name.clone()))?;
        let created = target
            .expose_port(name, caps)
            .map_err(|_| Error::PortNotFound {
                node: node_name.clone(),
                port: name.to_string(),
            })?;
        if !created {
            log::debug!("{}: port {} already exposed", node_name, name);
        }
        Ok(PortRef::new(node, name))
    }

    /// Links an output port to an input port. An input (and an output) takes
    /// at most one link.
    pub fn link(&mut self, src: &PortRef, sink: &PortRef) -> LinkOutcome {
        if self.sealed {
            log::warn!("{} is shut down, refusing new link", self.name);
            return LinkOutcome::Incompatible;
        }
        let (Some(out), Some(input)) = (self.port(src), self.port(sink)) else {
            log::warn!(
                "cannot link {} to {}: unknown port",
                self.describe(src),
                self.describe(sink)
            );
            return LinkOutcome::Incompatible;
        };
        if out.direction() != Direction::Output
            || input.direction() != Direction::Input
            || src.node == sink.node
        {
            log::warn!(
                "cannot link {} to {}: wrong direction",
                self.describe(src),
                self.describe(sink)
            );
            return LinkOutcome::Incompatible;
        }
        if input.is_linked() || out.is_linked() {
            log::debug!(
                "{} -> {}: already linked",
                self.describe(src),
                self.describe(sink)
            );
            return LinkOutcome::AlreadyLinked;
        }
        if !out.filter().intersects(&input.filter()) {
            log::warn!(
                "cannot link {} ({:?}) to {} ({:?}): caps do not intersect",
                self.describe(src),
                out.filter(),
                self.describe(sink),
                input.filter()
            );
            return LinkOutcome::Incompatible;
        }
        let Some(inbox) = self.inboxes.get(&sink.node).cloned() else {
            return LinkOutcome::Incompatible;
        };

        if let Some(port) = self.port_mut(src) {
            port.peer = Some(sink.clone());
        }
        if let Some(port) = self.port_mut(sink) {
            port.peer = Some(src.clone());
        }
        self.router.connect(src.clone(), sink.clone(), inbox);
        self.links.push(Link {
            src: src.clone(),
            sink: sink.clone(),
        });
        log::debug!("linked {} -> {}", self.describe(src), self.describe(sink));
        LinkOutcome::Linked
    }

    // First free compatible pair of static ports between two nodes.
    fn find_static_pair(&self, a: NodeId, b: NodeId) -> Option<(PortRef, PortRef)> {
        let (from, to) = (self.node(a)?, self.node(b)?);
        from.ports()
            .iter()
            .filter(|p| p.direction() == Direction::Output && p.is_static() && !p.is_linked())
            .find_map(|out| {
                to.ports()
                    .iter()
                    .find(|p| {
                        p.direction() == Direction::Input
                            && p.is_static()
                            && !p.is_linked()
                            && out.filter().intersects(&p.filter())
                    })
                    .map(|input| (PortRef::new(a, out.name()), PortRef::new(b, input.name())))
            })
    }

    /// Links a chain of nodes by name, each to the next, through their
    /// static ports.
    pub fn link_many(&mut self, names: &[&str]) -> Result<()> {
        for pair in names.windows(2) {
            let (a, b) = (self.lookup(pair[0])?, self.lookup(pair[1])?);
            let linked = match self.find_static_pair(a, b) {
                Some((src, sink)) => self.link(&src, &sink) == LinkOutcome::Linked,
                None => false,
            };
            if !linked {
                return Err(Error::ConstructionFailure(format!(
                    "failed to link {} to {}",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }

    /// Names of the terminal sinks reachable from `from` over current links.
    pub fn downstream_sinks(&self, from: NodeId) -> BTreeSet<String> {
        let mut sinks = BTreeSet::new();
        let mut seen = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for link in self.links.iter().filter(|l| l.src.node == current) {
                let next = link.sink.node;
                if !seen.insert(next) {
                    continue;
                }
                if let Some(node) = self.node(next) {
                    if node.kind() == NodeKind::Sink {
                        sinks.insert(node.name().to_string());
                    }
                }
                queue.push_back(next);
            }
        }
        sinks
    }

    fn post_state_changed(&self, src: &str, old: State, new: State, pending: State) {
        self.poster.post(Message::StateChanged {
            src: src.to_string(),
            old,
            new,
            pending,
        });
    }

    fn start_nodes(&mut self) -> Result<()> {
        for node in self.nodes.iter_mut() {
            let props = node.properties().clone();
            let result = match node.behavior_mut() {
                Some(Behavior::Element(element)) => element.start(&props),
                Some(Behavior::Source(source)) => source.start(&props),
                None => Ok(()),
            };
            if let Err(e) = result {
                return Err(Error::TransitionRejected {
                    node: node.name().to_string(),
                    target: State::Ready,
                    reason: format!("{:#}", e),
                });
            }
        }
        Ok(())
    }

    fn spawn_nodes(&mut self) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::TransitionRejected {
                node: self.name.clone(),
                target: State::Playing,
                reason: "no async runtime to run nodes on".to_string(),
            });
        }
        for (index, node) in self.nodes.iter_mut().enumerate() {
            let id = NodeId(index);
            let Some(behavior) = node.take_behavior() else {
                continue;
            };
            let name = node.name().to_string();
            let cancel = self.cancel.child_token();
            let handle = match behavior {
                Behavior::Element(element) => {
                    let Some(inbox) = self.pending_inboxes.remove(&id) else {
                        continue;
                    };
                    tokio::spawn(run_element(
                        id,
                        name,
                        element,
                        inbox,
                        self.router.clone(),
                        self.poster.clone(),
                        cancel,
                    ))
                }
                Behavior::Source(source) => {
                    let ctx = SourceContext {
                        node: id,
                        name,
                        router: self.router.clone(),
                        discovery: self.discovery_tx.clone(),
                        poster: self.poster.clone(),
                        cancel,
                    };
                    tokio::spawn(run_source(source, ctx))
                }
            };
            self.tasks.push(handle);
        }
        Ok(())
    }

    fn step(&mut self, next: State, target: State) -> Result<()> {
        match next {
            State::Ready => self.start_nodes()?,
            State::Playing => self.spawn_nodes()?,
            _ => {}
        }
        let old = self.state;
        let pending = if next == target { State::VoidPending } else { target };
        for node in &self.nodes {
            self.post_state_changed(node.name(), old, next, pending);
        }
        self.post_state_changed(&self.name, old, next, pending);
        self.state = next;
        Ok(())
    }

    /// Moves the graph up towards `target` one state at a time. Going to
    /// NULL commands every node idle and tears the graph down.
    pub fn set_state(&mut self, target: State) -> Result<()> {
        if target == State::Null {
            self.teardown();
            return Ok(());
        }
        if self.torn_down {
            return Err(Error::TransitionRejected {
                node: self.name.clone(),
                target,
                reason: "graph was torn down".to_string(),
            });
        }
        while self.state < target {
            let next = match self.state {
                State::VoidPending | State::Null => State::Ready,
                State::Ready => State::Paused,
                State::Paused | State::Playing => State::Playing,
            };
            self.step(next, target)?;
        }
        Ok(())
    }

    fn begin_teardown(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        self.sealed = true;
        log::info!(
            "{}: tearing down {} nodes, {} links",
            self.name,
            self.nodes.len(),
            self.links.len()
        );
        self.cancel.cancel();
        true
    }

    fn release(&mut self) {
        let old = self.state;
        self.state = State::Null;
        if old != State::Null {
            self.post_state_changed(&self.name, old, State::Null, State::VoidPending);
        }
        self.router.clear();
        self.links.clear();
        self.nodes.clear();
        self.by_name.clear();
        self.inboxes.clear();
        self.pending_inboxes.clear();
    }

    /// Stops accepting links, commands every node idle and waits for the
    /// node tasks to run their stop hooks, then releases all nodes, ports
    /// and links. Tasks still running after [`STOP_GRACE`] are aborted.
    /// Runs once; later calls (and [`Graph::teardown`]) return false.
    pub async fn shutdown(&mut self) -> bool {
        if !self.begin_teardown() {
            return false;
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.drain(..).collect();
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(STOP_GRACE, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            log::warn!("{}: node tasks did not stop in time, aborting", self.name);
            for handle in aborts {
                handle.abort();
            }
        }
        self.release();
        true
    }

    /// Synchronous variant of [`Graph::shutdown`] for paths that cannot
    /// wait: node tasks are cancelled and aborted without being joined.
    pub fn teardown(&mut self) -> bool {
        if !self.begin_teardown() {
            return false;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.release();
        true
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod graph_test;
