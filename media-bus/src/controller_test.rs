use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::buffer::Buffer;
use crate::bus::{Message, State};
use crate::caps::CapsFilter;
use crate::catalog::{Catalog, NodeFactory};
use crate::controller::{Controller, ControllerState};
use crate::element::{Element, ElementContext};
use crate::error::Result;
use crate::muxer::{HEADER_MAGIC, TRAILER_MAGIC};
use crate::node::{Behavior, Direction, Node, NodeKind, PortTemplate};
use crate::recorder::{Recorder, RecorderConfig};

fn config(dir: &tempfile::TempDir, streams: &[&str], buffers: u64) -> RecorderConfig {
    RecorderConfig {
        location: dir.path().join("rec.mp4").to_string_lossy().into_owned(),
        streams: streams.iter().map(|s| s.to_string()).collect(),
        buffers,
        interval_ms: 0,
        ..Default::default()
    }
}

async fn run_to_end(controller: &mut Controller) -> crate::controller::Outcome {
    tokio::time::timeout(Duration::from_secs(10), controller.run())
        .await
        .expect("run did not finish")
}

#[tokio::test]
async fn test_record_until_eos() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir, &["video/x-raw", "audio/x-raw"], 10);
    let mut controller = Controller::new(Recorder::assemble(&Catalog::new(), &config)?)?;
    assert_eq!(controller.state(), ControllerState::Assembled);

    controller.start()?;
    assert_eq!(controller.state(), ControllerState::Playing);
    let outcome = run_to_end(&mut controller).await;
    assert_eq!(outcome.state, ControllerState::Stopped);
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.exit_code(), 0);
    assert!(controller.is_torn_down());
    assert!(!controller.teardown());

    let data = std::fs::read(&config.location)?;
    assert_eq!(&data[..4], HEADER_MAGIC);
    let trailer = &data[data.len() - 8..];
    assert_eq!(&trailer[..4], TRAILER_MAGIC);
    assert_eq!(u32::from_be_bytes(trailer[4..].try_into()?), 20);

    // A finished run reports the same outcome again.
    assert_eq!(controller.run().await, outcome);
    Ok(())
}

#[tokio::test]
async fn test_unsupported_and_pending_streams_are_skipped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir, &["?", "text/x-raw", "audio/x-raw"], 5);
    let mut controller = Controller::new(Recorder::assemble(&Catalog::new(), &config)?)?;

    let outcome = run_to_end(&mut controller).await;
    assert_eq!(outcome.state, ControllerState::Stopped);

    let data = String::from_utf8_lossy(&std::fs::read(&config.location)?).into_owned();
    assert!(data.contains("audio/x-raw #4"));
    assert!(!data.contains("text/x-raw"));
    assert!(!data.contains("video_"));
    Ok(())
}

struct Exploding;

impl Element for Exploding {
    fn chain(
        &mut self,
        _pad: &str,
        _buffer: Buffer,
        _ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("encoder exploded")
    }
}

/// Catalog with a video encoder that fails on its first buffer.
struct BrokenVideoEncoder;

impl NodeFactory for BrokenVideoEncoder {
    fn create(&self, factory: &str, name: &str) -> Result<Node> {
        if factory != "x264enc" {
            return Catalog::new().create(factory, name);
        }
        Ok(Node::new(
            name,
            factory,
            NodeKind::Encoder,
            vec![
                PortTemplate::always("sink", Direction::Input, CapsFilter::family("video")),
                PortTemplate::always("src", Direction::Output, CapsFilter::family("video")),
            ],
            Behavior::Element(Box::new(Exploding)),
        ))
    }
}

#[tokio::test]
async fn test_node_error_fails_the_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir, &["video/x-raw", "audio/x-raw"], 10);
    let mut controller = Controller::new(Recorder::assemble(&BrokenVideoEncoder, &config)?)?;

    let outcome = run_to_end(&mut controller).await;
    assert_eq!(outcome.state, ControllerState::Failed);
    assert_eq!(outcome.exit_code(), -1);
    let error = outcome.error.expect("error recorded");
    assert_eq!(error.node, "video-encoder");
    assert!(error.message.contains("exploded"));
    assert!(error.debug.is_some());
    assert!(controller.is_torn_down());
    assert!(controller.graph().is_torn_down());
    Ok(())
}

#[tokio::test]
async fn test_rejected_start_tears_down() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(&dir, &["audio/x-raw"], 1);
    config.location = dir
        .path()
        .join("missing")
        .join("rec.mp4")
        .to_string_lossy()
        .into_owned();
    let mut controller = Controller::new(Recorder::assemble(&Catalog::new(), &config)?)?;

    assert!(controller.start().is_err());
    assert_eq!(controller.state(), ControllerState::Failed);
    assert!(controller.is_torn_down());
    assert!(!controller.teardown());

    let outcome = run_to_end(&mut controller).await;
    assert_eq!(outcome.state, ControllerState::Failed);
    assert_eq!(outcome.error.map(|e| e.node), Some("stream-pipeline".to_string()));
    assert!(controller.start().is_err(), "cannot restart a finished run");
    Ok(())
}

/// Video display sink that counts how often it was told to stop.
struct StopCounter(Arc<AtomicUsize>);

impl Element for StopCounter {
    fn chain(
        &mut self,
        _pad: &str,
        _buffer: Buffer,
        _ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn eos(&mut self, _pad: &str, ctx: &mut ElementContext<'_>) -> anyhow::Result<()> {
        ctx.post_sink_eos();
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CountingVideoSink {
    stops: Arc<AtomicUsize>,
    broken_encoder: bool,
}

impl NodeFactory for CountingVideoSink {
    fn create(&self, factory: &str, name: &str) -> Result<Node> {
        match factory {
            "autovideosink" => Ok(Node::new(
                name,
                factory,
                NodeKind::Sink,
                vec![PortTemplate::always(
                    "sink",
                    Direction::Input,
                    CapsFilter::family("video"),
                )],
                Behavior::Element(Box::new(StopCounter(self.stops.clone()))),
            )),
            "x264enc" if self.broken_encoder => BrokenVideoEncoder.create(factory, name),
            _ => Catalog::new().create(factory, name),
        }
    }
}

async fn stops_after_run(broken_encoder: bool) -> anyhow::Result<(ControllerState, usize)> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir, &["video/x-raw"], 5);
    let stops = Arc::new(AtomicUsize::new(0));
    let factory = CountingVideoSink {
        stops: stops.clone(),
        broken_encoder,
    };
    let mut controller = Controller::new(Recorder::assemble(&factory, &config)?)?;

    let outcome = run_to_end(&mut controller).await;
    assert!(!controller.teardown());
    drop(controller);
    Ok((outcome.state, stops.load(Ordering::SeqCst)))
}

#[tokio::test]
async fn test_nodes_stopped_once_after_eos() -> anyhow::Result<()> {
    let (state, stops) = stops_after_run(false).await?;
    assert_eq!(state, ControllerState::Stopped);
    assert_eq!(stops, 1);
    Ok(())
}

#[tokio::test]
async fn test_nodes_stopped_once_after_error() -> anyhow::Result<()> {
    let (state, stops) = stops_after_run(true).await?;
    assert_eq!(state, ControllerState::Failed);
    assert_eq!(stops, 1);
    Ok(())
}

fn root_to_null(controller: &mut Controller) -> usize {
    let mut count = 0;
    while let Some(message) = controller.bus.try_pop() {
        if let Message::StateChanged {
            src,
            new: State::Null,
            ..
        } = message
        {
            if src == "stream-pipeline" {
                count += 1;
            }
        }
    }
    count
}

#[tokio::test]
async fn test_events_after_the_first_terminal_one_are_ignored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir, &["audio/x-raw"], 5);
    let mut controller = Controller::new(Recorder::assemble(&Catalog::new(), &config)?)?;

    let poster = controller.bus.poster();
    for message in [
        Message::Error {
            src: "a".to_string(),
            message: "first".to_string(),
            debug: None,
        },
        Message::Eos {
            src: "stream-pipeline".to_string(),
        },
        Message::Error {
            src: "b".to_string(),
            message: "second".to_string(),
            debug: None,
        },
    ] {
        poster.post(message);
    }

    let outcome = run_to_end(&mut controller).await;
    assert_eq!(outcome.state, ControllerState::Failed);
    let error = outcome.error.clone().expect("error recorded");
    assert_eq!((error.node.as_str(), error.message.as_str()), ("a", "first"));
    assert!(!controller.teardown());
    assert!(!controller.shutdown().await);
    assert_eq!(root_to_null(&mut controller), 1);

    assert_eq!(run_to_end(&mut controller).await, outcome);
    assert_eq!(root_to_null(&mut controller), 0);
    Ok(())
}
