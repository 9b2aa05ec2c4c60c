use bytes::Bytes;

use crate::caps::Caps;

pub type InboxSender = tokio::sync::mpsc::Sender<Incoming>;
pub type InboxReceiver = tokio::sync::mpsc::Receiver<Incoming>;

#[derive(Clone, Debug)]
pub enum BufferCmd {
    Data(Buffer),
    Eos,
}

/// A command delivered to a node, tagged with the input port it arrived on.
#[derive(Debug)]
pub struct Incoming {
    pub pad: String,
    pub cmd: BufferCmd,
}

/// One media item. Cloning shares the payload.
#[derive(Clone, Debug)]
pub struct Buffer {
    caps: Caps,
    pts: i64,
    data: Bytes,
}

impl Buffer {
    pub fn new(caps: Caps, pts: i64, data: impl Into<Bytes>) -> Self {
        Self {
            caps,
            pts,
            data: data.into(),
        }
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Same payload relabelled with new caps (used by encoders).
    pub fn with_caps(self, caps: Caps) -> Self {
        Self { caps, ..self }
    }
}
