use serde::{Deserialize, Serialize};

use crate::{
    caps::{AUDIO_RAW, MediaType, VIDEO_RAW},
    catalog::NodeFactory,
    error::{Error, Result},
    graph::{Graph, LinkOutcome},
    linker::{Branch, BranchTable},
};

/// Opaque settings handed to the nodes that need them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Where the source reads from; never inspected by the graph.
    pub uri: String,
    /// Output file of the record branch.
    pub location: String,
    /// Caps of the streams the source will announce, in order.
    pub streams: Vec<String>,
    /// Buffers produced per stream.
    pub buffers: u64,
    /// Pause between two rounds of buffers.
    pub interval_ms: u64,
    pub queue_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            uri: "https://gstreamer.freedesktop.org/data/media/sintel_trailer-480p.webm"
                .to_string(),
            location: "./rec.mp4".to_string(),
            streams: vec![VIDEO_RAW.to_string(), AUDIO_RAW.to_string()],
            buffers: 100,
            interval_ms: 10,
            queue_capacity: 64,
        }
    }
}

pub const PIPELINE_NAME: &str = "stream-pipeline";
pub const SOURCE: &str = "source";
pub const MUXER: &str = "muxer";
pub const FILE_SINK: &str = "file-sink";

// (factory, name)
const NODES: &[(&str, &str)] = &[
    ("uridecodebin", SOURCE),
    ("queue", "audio-queue"),
    ("queue", "video-queue"),
    ("tee", "audio-tee"),
    ("tee", "video-tee"),
    ("queue", "audio-queue-record"),
    ("queue", "video-queue-record"),
    ("queue", "audio-queue-display"),
    ("queue", "video-queue-display"),
    ("voaacenc", "audio-encoder"),
    ("x264enc", "video-encoder"),
    ("mp4mux", MUXER),
    ("filesink", FILE_SINK),
    ("audioconvert", "audio-convert"),
    ("autoaudiosink", "audio-sink"),
    ("videoconvert", "video-convert"),
    ("autovideosink", "video-sink"),
];

/// The statically assembled preview + record graph:
///
/// ```text
///                         ┌─► queue-display ─► convert ─► sink
/// source ┄┄► queue ─► tee ┤
///                         └─► queue-record ─► encoder ┄┄► muxer ─► file-sink
/// ```
///
/// one per media type. The dotted links are made at runtime by the
/// [`crate::linker::Linker`] once the source reports its streams.
pub struct Recorder {
    pub graph: Graph,
    pub branches: BranchTable,
}

impl Recorder {
    /// Creates and links every static node. Any failure aborts the whole
    /// assembly; the partial graph is dropped and never started.
    pub fn assemble(factory: &impl NodeFactory, config: &RecorderConfig) -> Result<Self> {
        let mut graph = Graph::new(PIPELINE_NAME);

        for (factory_name, name) in NODES {
            let mut node = factory.create(factory_name, name).map_err(|e| {
                Error::ConstructionFailure(format!("not all elements could be created: {}", e))
            })?;
            match *name {
                SOURCE => {
                    node.set_property("uri", config.uri.as_str());
                    node.set_property("streams", config.streams.join(","));
                    node.set_property("num-buffers", config.buffers.to_string());
                    node.set_property("interval-ms", config.interval_ms.to_string());
                }
                FILE_SINK => node.set_property("location", config.location.as_str()),
                _ => {}
            }
            graph.add(node)?;
        }

        for media in [MediaType::Audio, MediaType::Video] {
            let m = media.as_str();
            graph.link_many(&[format!("{m}-queue").as_str(), format!("{m}-tee").as_str()])?;
            graph.link_many(&[
                format!("{m}-queue-display").as_str(),
                format!("{m}-convert").as_str(),
                format!("{m}-sink").as_str(),
            ])?;
            graph.link_many(&[
                format!("{m}-queue-record").as_str(),
                format!("{m}-encoder").as_str(),
            ])?;
        }
        graph.link_many(&[MUXER, FILE_SINK])?;

        for media in [MediaType::Audio, MediaType::Video] {
            let m = media.as_str();
            let tee = graph.lookup(&format!("{m}-tee"))?;
            for target in ["display", "record"] {
                let queue = graph.lookup(&format!("{m}-queue-{target}"))?;
                let src = graph.request_port(tee, "src_%u")?;
                let sink = graph.static_port(queue, "sink")?;
                if graph.link(&src, &sink) != LinkOutcome::Linked {
                    return Err(Error::ConstructionFailure(format!(
                        "failed to link {} to {}",
                        graph.describe(&src),
                        graph.describe(&sink)
                    )));
                }
            }
        }

        let branch = |graph: &Graph, media: MediaType| -> Result<Branch> {
            let m = media.as_str();
            Ok(Branch {
                media,
                entry: graph.static_port(graph.lookup(&format!("{m}-queue"))?, "sink")?,
                encoder_src: graph.static_port(graph.lookup(&format!("{m}-encoder"))?, "src")?,
            })
        };
        let branches = BranchTable {
            audio: branch(&graph, MediaType::Audio)?,
            video: branch(&graph, MediaType::Video)?,
            muxer: graph.lookup(MUXER)?,
        };

        log::info!(
            "{} assembled: {} nodes, {} links",
            graph.name(),
            graph.nodes().count(),
            graph.links().len()
        );
        Ok(Self { graph, branches })
    }
}

#[cfg(test)]
#[path = "recorder_test.rs"]
mod recorder_test;
