use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use crate::{
    caps::{Caps, CapsFilter},
    element::Element,
    source::SourceElement,
};

pub type Properties = BTreeMap<String, String>;

/// Index of a node inside its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Address of a port: owning node plus port name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub node: NodeId,
    pub name: String,
}

impl PortRef {
    pub fn new(node: NodeId, name: impl Into<String>) -> Self {
        Self {
            node,
            name: name.into(),
        }
    }
}

impl Display for PortRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.node.0, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Source,
    Queue,
    BranchPoint,
    Converter,
    Encoder,
    Muxer,
    Sink,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Presence {
    /// Exists for the node's whole lifetime.
    Always,
    /// Created by the node itself once it knows what it produces.
    Sometimes,
    /// Created on demand by whoever links to the node.
    Request,
}

#[derive(Clone, Debug)]
pub struct PortTemplate {
    name: String,
    direction: Direction,
    presence: Presence,
    filter: CapsFilter,
}

impl PortTemplate {
    pub fn new(
        name: &str,
        direction: Direction,
        presence: Presence,
        filter: CapsFilter,
    ) -> Self {
        Self {
            name: name.to_string(),
            direction,
            presence,
            filter,
        }
    }

    pub fn always(name: &str, direction: Direction, filter: CapsFilter) -> Self {
        Self::new(name, direction, Presence::Always, filter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// `src_%u` matches `src_0`, `src_12`; fixed names match themselves.
    pub fn matches(&self, port_name: &str) -> bool {
        match self.name.strip_suffix("%u") {
            Some(prefix) => port_name
                .strip_prefix(prefix)
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())),
            None => self.name == port_name,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Port {
    name: String,
    direction: Direction,
    presence: Presence,
    filter: CapsFilter,
    caps: Option<Caps>,
    pub(crate) peer: Option<PortRef>,
}

impl Port {
    fn from_template(template: &PortTemplate, name: &str, caps: Option<Caps>) -> Self {
        Self {
            name: name.to_string(),
            direction: template.direction,
            presence: template.presence,
            filter: template.filter.clone(),
            caps,
            peer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn is_static(&self) -> bool {
        self.presence == Presence::Always
    }

    /// Current caps, `None` while negotiation is pending.
    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }

    pub fn peer(&self) -> Option<&PortRef> {
        self.peer.as_ref()
    }

    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }

    /// What this port can carry right now: its fixed caps if negotiated,
    /// otherwise whatever its template allows.
    pub fn filter(&self) -> CapsFilter {
        match &self.caps {
            Some(caps) => CapsFilter::from(caps),
            None => self.filter.clone(),
        }
    }
}

/// Runtime behavior a node runs once the graph is playing.
pub enum Behavior {
    Element(Box<dyn Element>),
    Source(Box<dyn SourceElement>),
}

pub struct Node {
    name: String,
    factory: String,
    kind: NodeKind,
    templates: Vec<PortTemplate>,
    ports: Vec<Port>,
    properties: Properties,
    next_index: HashMap<String, u32>,
    request_limit: Option<usize>,
    requested: usize,
    inbox_capacity: usize,
    behavior: Option<Behavior>,
}

impl Node {
    pub const DEFAULT_INBOX_CAPACITY: usize = 16;

    pub fn new(
        name: &str,
        factory: &str,
        kind: NodeKind,
        templates: Vec<PortTemplate>,
        behavior: Behavior,
    ) -> Self {
        let ports = templates
            .iter()
            .filter(|t| t.presence == Presence::Always)
            .map(|t| Port::from_template(t, &t.name, None))
            .collect();
        Self {
            name: name.to_string(),
            factory: factory.to_string(),
            kind,
            templates,
            ports,
            properties: Properties::new(),
            next_index: HashMap::new(),
            request_limit: None,
            requested: 0,
            inbox_capacity: Self::DEFAULT_INBOX_CAPACITY,
            behavior: Some(behavior),
        }
    }

    /// Caps the number of request ports the node hands out.
    pub fn with_request_limit(mut self, limit: usize) -> Self {
        self.request_limit = Some(limit);
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn inbox_capacity(&self) -> usize {
        self.inbox_capacity
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub(crate) fn port_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.name == name)
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<String>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Creates a fresh port from a request template. Never blocks; either a
    /// new unlinked port name or the reason it cannot be created.
    pub(crate) fn request_port(&mut self, template: &str) -> Result<String, String> {
        let tmpl = self
            .templates
            .iter()
            .find(|t| t.name == template && t.presence == Presence::Request)
            .cloned()
            .ok_or_else(|| format!("{} has no request template {}", self.factory, template))?;
        if let Some(limit) = self.request_limit {
            if self.requested >= limit {
                return Err(format!("request limit of {} reached", limit));
            }
        }
        let index = self.next_index.entry(tmpl.name.clone()).or_insert(0);
        let name = tmpl.name.replace("%u", &index.to_string());
        *index += 1;
        self.requested += 1;
        self.ports.push(Port::from_template(&tmpl, &name, None));
        Ok(name)
    }

    /// Adds a port the node discovered by itself. Exposing the same name
    /// twice returns `Ok(false)` and leaves the existing port alone.
    pub(crate) fn expose_port(&mut self, name: &str, caps: Option<Caps>) -> Result<bool, String> {
        if self.port(name).is_some() {
            return Ok(false);
        }
        let tmpl = self
            .templates
            .iter()
            .find(|t| t.presence == Presence::Sometimes && t.matches(name))
            .cloned()
            .ok_or_else(|| format!("{} has no sometimes template for {}", self.factory, name))?;
        self.ports.push(Port::from_template(&tmpl, name, caps));
        Ok(true)
    }

    pub(crate) fn take_behavior(&mut self) -> Option<Behavior> {
        self.behavior.take()
    }

    pub(crate) fn behavior_mut(&mut self) -> Option<&mut Behavior> {
        self.behavior.as_mut()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("factory", &self.factory)
            .field("kind", &self.kind)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}
