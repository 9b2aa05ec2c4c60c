use std::collections::{BTreeSet, VecDeque};
use std::fmt::{Display, Formatter};

use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    VoidPending,
    Null,
    Ready,
    Paused,
    Playing,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::VoidPending => "VOID_PENDING",
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Diagnostic event posted by a node (or the graph itself) on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    StateChanged {
        src: String,
        old: State,
        new: State,
        pending: State,
    },
    Error {
        src: String,
        message: String,
        debug: Option<String>,
    },
    /// Graph level end-of-stream, emitted once every expected sink finished.
    Eos { src: String },
    Warning { src: String, message: String },
    StreamStart { src: String },
    /// A single sink reached end-of-stream.
    SinkEos { src: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    StateChanged,
    Error,
    Eos,
    Warning,
    StreamStart,
    Element,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::StateChanged { .. } => MessageKind::StateChanged,
            Message::Error { .. } => MessageKind::Error,
            Message::Eos { .. } => MessageKind::Eos,
            Message::Warning { .. } => MessageKind::Warning,
            Message::StreamStart { .. } => MessageKind::StreamStart,
            Message::SinkEos { .. } => MessageKind::Element,
        }
    }

    pub fn src(&self) -> &str {
        match self {
            Message::StateChanged { src, .. }
            | Message::Error { src, .. }
            | Message::Eos { src }
            | Message::Warning { src, .. }
            | Message::StreamStart { src }
            | Message::SinkEos { src } => src,
        }
    }

    pub fn error(src: &str, err: &anyhow::Error) -> Self {
        Message::Error {
            src: src.to_string(),
            message: err.to_string(),
            debug: Some(format!("{:?}", err)),
        }
    }
}

/// Cloneable posting side handed to every node.
#[derive(Clone, Debug)]
pub struct BusPoster {
    tx: mpsc::UnboundedSender<Message>,
}

impl BusPoster {
    pub fn post(&self, message: Message) {
        if self.tx.send(message).is_err() {
            log::trace!("bus closed, message dropped");
        }
    }
}

/// Receiving side of the diagnostics channel. Messages from all nodes are
/// merged into one stream in posting order.
pub struct Bus {
    root: String,
    rx: mpsc::UnboundedReceiver<Message>,
    poster: BusPoster,
    pending: VecDeque<Message>,
    expected_eos: Option<BTreeSet<String>>,
    finished_sinks: BTreeSet<String>,
    eos_posted: bool,
}

impl Bus {
    pub fn new(root: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            root: root.to_string(),
            rx,
            poster: BusPoster { tx },
            pending: VecDeque::new(),
            expected_eos: None,
            finished_sinks: BTreeSet::new(),
            eos_posted: false,
        }
    }

    pub fn poster(&self) -> BusPoster {
        self.poster.clone()
    }

    /// Declares which sinks must report end-of-stream before the graph level
    /// `Eos` is emitted. An empty set completes immediately.
    pub fn expect_eos_from(&mut self, sinks: BTreeSet<String>) {
        log::debug!("bus {}: waiting for eos from {:?}", self.root, sinks);
        self.expected_eos = Some(sinks);
        self.check_eos();
    }

    fn check_eos(&mut self) {
        if self.eos_posted {
            return;
        }
        let Some(expected) = self.expected_eos.as_ref() else {
            return;
        };
        if expected.is_subset(&self.finished_sinks) {
            self.eos_posted = true;
            self.pending.push_back(Message::Eos {
                src: self.root.clone(),
            });
        }
    }

    /// Waits for the next message, without a timeout.
    pub async fn pop(&mut self) -> Option<Message> {
        if let Some(message) = self.pending.pop_front() {
            return Some(message);
        }
        let message = self.rx.recv().await?;
        if let Message::SinkEos { src } = &message {
            self.finished_sinks.insert(src.clone());
            self.check_eos();
        }
        Some(message)
    }

    /// Waits for the next message whose kind is in `filter`; everything
    /// else is consumed and dropped.
    pub async fn pop_filtered(&mut self, filter: &[MessageKind]) -> Option<Message> {
        loop {
            let message = self.pop().await?;
            if filter.contains(&message.kind()) {
                return Some(message);
            }
            log::trace!("bus {}: skipping {:?}", self.root, message);
        }
    }

    /// Non-blocking variant of [`Bus::pop`].
    pub fn try_pop(&mut self) -> Option<Message> {
        if let Some(message) = self.pending.pop_front() {
            return Some(message);
        }
        let message = self.rx.try_recv().ok()?;
        if let Message::SinkEos { src } = &message {
            self.finished_sinks.insert(src.clone());
            self.check_eos();
        }
        Some(message)
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod bus_test;
