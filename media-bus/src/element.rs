use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use crate::{
    buffer::{Buffer, BufferCmd, InboxReceiver},
    bus::{BusPoster, Message},
    caps::Caps,
    node::{NodeId, PortRef, Properties},
    router::Router,
};

/// Processing done by a non-source node for every command on its inbox.
pub trait Element: Send + 'static {
    /// Called while the graph goes from NULL to READY. An error rejects the
    /// state change.
    fn start(&mut self, _props: &Properties) -> anyhow::Result<()> {
        Ok(())
    }

    fn chain(
        &mut self,
        pad: &str,
        buffer: Buffer,
        ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()>;

    /// Forwards end-of-stream to every linked output by default.
    fn eos(&mut self, _pad: &str, ctx: &mut ElementContext<'_>) -> anyhow::Result<()> {
        ctx.push_all(BufferCmd::Eos);
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

enum Target {
    Pad(String),
    AllOutputs,
}

/// Collects what an element wants to emit while handling one command;
/// delivered by the node task once the element returns.
pub struct ElementContext<'a> {
    node: NodeId,
    name: &'a str,
    router: &'a Router,
    pushes: Vec<(Target, BufferCmd)>,
    messages: Vec<Message>,
}

impl<'a> ElementContext<'a> {
    pub(crate) fn new(node: NodeId, name: &'a str, router: &'a Router) -> Self {
        Self {
            node,
            name,
            router,
            pushes: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn push(&mut self, pad: &str, cmd: BufferCmd) {
        self.pushes.push((Target::Pad(pad.to_string()), cmd));
    }

    /// Sends a copy of `cmd` to every output port linked at delivery time.
    pub fn push_all(&mut self, cmd: BufferCmd) {
        self.pushes.push((Target::AllOutputs, cmd));
    }

    pub fn linked_inputs(&self) -> BTreeSet<String> {
        self.router.linked_inputs(self.node)
    }

    pub fn post_sink_eos(&mut self) {
        self.messages.push(Message::SinkEos {
            src: self.name.to_string(),
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.messages.push(Message::Warning {
            src: self.name.to_string(),
            message: message.into(),
        });
    }

    pub(crate) async fn flush(self, poster: &BusPoster) {
        for (target, cmd) in self.pushes {
            match target {
                Target::Pad(pad) => {
                    self.router.push(&PortRef::new(self.node, pad), cmd).await;
                }
                Target::AllOutputs => {
                    for port in self.router.linked_outputs(self.node) {
                        self.router.push(&port, cmd.clone()).await;
                    }
                }
            }
        }
        for message in self.messages {
            poster.post(message);
        }
    }
}

/// Node task: drains the inbox until cancelled, the inbox closes, or the
/// element fails. A failure is posted as an error on the bus.
pub(crate) async fn run_element(
    node: NodeId,
    name: String,
    mut element: Box<dyn Element>,
    mut inbox: InboxReceiver,
    router: Router,
    poster: BusPoster,
    cancel: CancellationToken,
) {
    loop {
        let incoming = tokio::select! {
            _ = cancel.cancelled() => break,
            incoming = inbox.recv() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };
        let mut ctx = ElementContext::new(node, &name, &router);
        let result = match incoming.cmd {
            BufferCmd::Data(buffer) => element.chain(&incoming.pad, buffer, &mut ctx),
            BufferCmd::Eos => element.eos(&incoming.pad, &mut ctx),
        };
        if let Err(e) = result {
            log::error!("{} failed: {:#}", name, e);
            poster.post(Message::error(&name, &e));
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ctx.flush(&poster) => {},
        }
    }
    if let Err(e) = element.stop() {
        log::warn!("{} stop error: {:#}", name, e);
    }
    log::debug!("{} task finished", name);
}

/// Queue and converter behavior: hands every buffer to `src` untouched.
#[derive(Default)]
pub struct Passthrough;

impl Element for Passthrough {
    fn chain(
        &mut self,
        _pad: &str,
        buffer: Buffer,
        ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()> {
        ctx.push("src", BufferCmd::Data(buffer));
        Ok(())
    }
}

/// Stand-in encoder: relabels raw buffers with the encoded format.
pub struct Encode {
    input_family: String,
    output: Caps,
    frames: u64,
}

impl Encode {
    pub fn new(input_family: &str, output: Caps) -> Self {
        Self {
            input_family: input_family.to_string(),
            output,
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Element for Encode {
    fn chain(
        &mut self,
        _pad: &str,
        buffer: Buffer,
        ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()> {
        if buffer.caps().family() != self.input_family {
            anyhow::bail!("cannot encode {} into {}", buffer.caps(), self.output);
        }
        self.frames += 1;
        ctx.push("src", BufferCmd::Data(buffer.with_caps(self.output.clone())));
        Ok(())
    }

    fn eos(&mut self, _pad: &str, ctx: &mut ElementContext<'_>) -> anyhow::Result<()> {
        log::debug!("{}: encoded {} frames", ctx.name(), self.frames);
        ctx.push("src", BufferCmd::Eos);
        Ok(())
    }
}

#[cfg(test)]
#[path = "element_test.rs"]
mod element_test;
