use crate::{
    bus::{Bus, Message, MessageKind, State},
    error::{Error, Result},
    graph::Graph,
    linker::{BranchTable, Linker},
    recorder::Recorder,
    source::{DiscoveryReceiver, SourceEvent},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Assembled,
    Playing,
    Stopped,
    Failed,
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControllerState::Stopped | ControllerState::Failed)
    }
}

/// First error that ended a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeError {
    pub node: String,
    pub message: String,
    pub debug: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub state: ControllerState,
    pub error: Option<RuntimeError>,
}

impl Outcome {
    /// 0 for a clean end-of-stream, -1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            ControllerState::Stopped => 0,
            _ => -1,
        }
    }
}

const WATCHED: &[MessageKind] = &[
    MessageKind::StateChanged,
    MessageKind::Error,
    MessageKind::Eos,
];

enum Step {
    Source(SourceEvent),
    Bus(Option<Message>),
}

/// Drives one assembled graph from start to a terminal state.
///
/// Runs on a single task: discovery events from the source and messages
/// from the bus are handled here one at a time, so the graph is never
/// mutated concurrently.
pub struct Controller {
    graph: Graph,
    branches: BranchTable,
    bus: Bus,
    discovery: DiscoveryReceiver,
    linker: Linker,
    state: ControllerState,
    error: Option<RuntimeError>,
    torn_down: bool,
}

impl Controller {
    pub fn new(recorder: Recorder) -> Result<Self> {
        let Recorder {
            mut graph,
            branches,
        } = recorder;
        let bus = graph
            .take_bus()
            .ok_or_else(|| Error::ConstructionFailure("bus already taken".to_string()))?;
        let discovery = graph.take_discovery().ok_or_else(|| {
            Error::ConstructionFailure("discovery channel already taken".to_string())
        })?;
        Ok(Self {
            graph,
            branches,
            bus,
            discovery,
            linker: Linker::new(),
            state: ControllerState::Assembled,
            error: None,
            torn_down: false,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    pub fn outcome(&self) -> Outcome {
        Outcome {
            state: self.state,
            error: self.error.clone(),
        }
    }

    /// Requests PLAYING. On rejection the graph is torn down and the
    /// controller ends up Failed.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ControllerState::Assembled {
            return Err(Error::TransitionRejected {
                node: self.graph.name().to_string(),
                target: State::Playing,
                reason: format!("controller is {:?}", self.state),
            });
        }
        log::info!("starting {}", self.graph.name());
        if let Err(e) = self.graph.set_state(State::Playing) {
            log::error!("Unable to set the pipeline to the playing state: {}", e);
            self.settle(
                ControllerState::Failed,
                Some(RuntimeError {
                    node: self.graph.name().to_string(),
                    message: e.to_string(),
                    debug: None,
                }),
            );
            self.teardown();
            return Err(e);
        }
        self.state = ControllerState::Playing;
        Ok(())
    }

    /// Handles discovery and bus messages until end-of-stream or the first
    /// error, then shuts the graph down. Starts the graph first if that was
    /// not done yet. Messages still queued after the terminal one are never
    /// looked at; calling it again gives back the same outcome.
    pub async fn run(&mut self) -> Outcome {
        if self.state == ControllerState::Assembled && self.start().is_err() {
            return self.outcome();
        }
        while !self.state.is_terminal() {
            let step = tokio::select! {
                biased;
                Some(event) = self.discovery.recv() => Step::Source(event),
                message = self.bus.pop_filtered(WATCHED) => Step::Bus(message),
            };
            match step {
                Step::Source(event) => self.on_source_event(event),
                Step::Bus(Some(message)) => self.on_message(message),
                Step::Bus(None) => self.settle(
                    ControllerState::Failed,
                    Some(RuntimeError {
                        node: self.graph.name().to_string(),
                        message: "bus closed unexpectedly".to_string(),
                        debug: None,
                    }),
                ),
            }
        }
        self.shutdown().await;
        self.outcome()
    }

    fn on_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::NewPort {
                node,
                name,
                caps,
                ack,
            } => {
                match self.graph.expose_port(node, &name, caps) {
                    Ok(port) => {
                        let branches = &self.branches;
                        let result = self.linker.handle_new_port(&mut self.graph, branches, &port);
                        log::debug!("{}: {:?}", name, result);
                    }
                    Err(e) => log::warn!("cannot expose {}: {}", name, e),
                }
                if ack.send(()).is_err() {
                    log::debug!("source went away before {} was acknowledged", name);
                }
            }
            SourceEvent::NoMorePorts { node } => {
                let sinks = self.graph.downstream_sinks(node);
                log::info!("all streams discovered, waiting for eos from {:?}", sinks);
                self.bus.expect_eos_from(sinks);
            }
        }
    }

    fn on_message(&mut self, message: Message) {
        match message {
            Message::StateChanged { src, old, new, .. } => {
                if src == self.graph.name() {
                    log::info!("Pipeline state changed from {} to {}", old, new);
                }
            }
            Message::Error {
                src,
                message,
                debug,
            } => {
                log::error!("Error received from element {}: {}", src, message);
                log::error!(
                    "Debugging information: {}",
                    debug.as_deref().unwrap_or("none")
                );
                self.settle(
                    ControllerState::Failed,
                    Some(RuntimeError {
                        node: src,
                        message,
                        debug,
                    }),
                );
            }
            Message::Eos { .. } => {
                log::info!("End-Of-Stream reached.");
                self.settle(ControllerState::Stopped, None);
            }
            other => log::trace!("unexpected message {:?}", other),
        }
    }

    fn settle(&mut self, state: ControllerState, error: Option<RuntimeError>) {
        self.state = state;
        if self.error.is_none() {
            self.error = error;
        }
    }

    /// Commands every node idle, waits for them and releases the graph.
    /// Returns false if the graph was already released.
    pub async fn shutdown(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        self.graph.shutdown().await;
        log::debug!("{} released", self.graph.name());
        true
    }

    /// Like [`Controller::shutdown`] but without waiting for node tasks.
    pub fn teardown(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        self.graph.teardown();
        log::debug!("{} released", self.graph.name());
        true
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
