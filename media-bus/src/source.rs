use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::{Buffer, BufferCmd},
    bus::{BusPoster, Message},
    caps::{AUDIO_RAW, Caps, VIDEO_RAW},
    node::{NodeId, PortRef, Properties},
    router::Router,
};

pub type DiscoverySender = mpsc::UnboundedSender<SourceEvent>;
pub type DiscoveryReceiver = mpsc::UnboundedReceiver<SourceEvent>;

/// Runtime notifications from a source node, handled on the control task.
#[derive(Debug)]
pub enum SourceEvent {
    /// A new elementary stream appeared. `caps` is `None` while negotiation
    /// is still pending. `ack` fires once the port has been handled, so the
    /// source never pushes into a port before its links exist.
    NewPort {
        node: NodeId,
        name: String,
        caps: Option<Caps>,
        ack: oneshot::Sender<()>,
    },
    NoMorePorts {
        node: NodeId,
    },
}

/// Behavior of a source node. Unlike [`crate::element::Element`] a source
/// drives itself: it announces ports and pushes buffers until done.
pub trait SourceElement: Send + 'static {
    fn start(&mut self, _props: &Properties) -> anyhow::Result<()> {
        Ok(())
    }

    fn run(self: Box<Self>, ctx: SourceContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

pub struct SourceContext {
    pub(crate) node: NodeId,
    pub(crate) name: String,
    pub(crate) router: Router,
    pub(crate) discovery: DiscoverySender,
    pub(crate) poster: BusPoster,
    pub(crate) cancel: CancellationToken,
}

impl SourceContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raises discovery for a new port and waits until it has been handled.
    pub async fn announce_port(&self, port: &str, caps: Option<Caps>) -> anyhow::Result<()> {
        let (ack, done) = oneshot::channel();
        self.discovery
            .send(SourceEvent::NewPort {
                node: self.node,
                name: port.to_string(),
                caps,
                ack,
            })
            .map_err(|_| anyhow::anyhow!("discovery channel closed"))?;
        done.await
            .map_err(|_| anyhow::anyhow!("port {} was never acknowledged", port))
    }

    pub fn no_more_ports(&self) {
        if self
            .discovery
            .send(SourceEvent::NoMorePorts { node: self.node })
            .is_err()
        {
            log::warn!("{}: discovery channel closed", self.name);
        }
    }

    pub async fn push(&self, port: &str, cmd: BufferCmd) -> bool {
        self.router.push(&PortRef::new(self.node, port), cmd).await
    }

    pub fn post(&self, message: Message) {
        self.poster.post(message);
    }
}

pub(crate) async fn run_source(source: Box<dyn SourceElement>, ctx: SourceContext) {
    let name = ctx.name.clone();
    let poster = ctx.poster.clone();
    let cancel = ctx.cancel.clone();
    tokio::select! {
        _ = cancel.cancelled() => {
            log::debug!("{} cancelled", name);
        }
        result = source.run(ctx) => {
            if let Err(e) = result {
                log::error!("{} failed: {:#}", name, e);
                poster.post(Message::error(&name, &e));
            }
        }
    }
}

/// Stand-in for a decoding source. Announces one `src_N` port per entry of
/// the `streams` property, then produces `num-buffers` buffers on each and
/// finishes with end-of-stream. A stream entry of `?` announces a port whose
/// caps are not negotiated yet.
pub struct GeneratorSource {
    uri: Option<String>,
    streams: Vec<Option<Caps>>,
    num_buffers: u64,
    interval: Duration,
}

impl Default for GeneratorSource {
    fn default() -> Self {
        Self {
            uri: None,
            streams: vec![Some(Caps::new(VIDEO_RAW)), Some(Caps::new(AUDIO_RAW))],
            num_buffers: 100,
            interval: Duration::ZERO,
        }
    }
}

impl SourceElement for GeneratorSource {
    fn start(&mut self, props: &Properties) -> anyhow::Result<()> {
        self.uri = props.get("uri").cloned();
        if let Some(streams) = props.get("streams") {
            self.streams = streams
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| if s == "?" { None } else { Some(Caps::new(s)) })
                .collect();
        }
        if let Some(n) = props.get("num-buffers") {
            self.num_buffers = n
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid num-buffers {:?}: {}", n, e))?;
        }
        if let Some(ms) = props.get("interval-ms") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid interval-ms {:?}: {}", ms, e))?;
            self.interval = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn run(self: Box<Self>, ctx: SourceContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            log::info!(
                "{}: reading {}",
                ctx.name(),
                self.uri.as_deref().unwrap_or("<no uri>")
            );
            let mut ports = Vec::with_capacity(self.streams.len());
            for (index, caps) in self.streams.iter().enumerate() {
                let port = format!("src_{}", index);
                ctx.announce_port(&port, caps.clone()).await?;
                if let Some(caps) = caps {
                    ports.push((port, caps.clone()));
                }
            }
            ctx.no_more_ports();
            ctx.post(Message::StreamStart {
                src: ctx.name().to_string(),
            });

            for n in 0..self.num_buffers {
                if ctx.is_cancelled() {
                    return Ok(());
                }
                for (port, caps) in &ports {
                    let payload = format!("{} #{}", caps, n);
                    let buffer = Buffer::new(caps.clone(), n as i64, payload.into_bytes());
                    ctx.push(port, BufferCmd::Data(buffer)).await;
                }
                if !self.interval.is_zero() {
                    tokio::time::sleep(self.interval).await;
                }
            }
            for (port, _) in &ports {
                ctx.push(port, BufferCmd::Eos).await;
            }
            log::info!("{}: end of input", ctx.name());
            Ok(())
        })
    }
}
