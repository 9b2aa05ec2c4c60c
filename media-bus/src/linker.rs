use std::collections::HashMap;

use crate::{
    caps::{Caps, MediaType, classify},
    error::Error,
    graph::{Graph, LinkOutcome},
    node::{NodeId, PortRef},
};

/// One media type's pair of sub-branches behind a branch point.
#[derive(Clone, Debug)]
pub struct Branch {
    pub media: MediaType,
    /// Input of the queue that feeds the branch point.
    pub entry: PortRef,
    /// Output of the record sub-branch encoder.
    pub encoder_src: PortRef,
}

/// Where discovered streams go. Passed explicitly to the linker.
#[derive(Clone, Debug)]
pub struct BranchTable {
    pub audio: Branch,
    pub video: Branch,
    pub muxer: NodeId,
}

impl BranchTable {
    pub fn branch(&self, media: MediaType) -> &Branch {
        match media {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Unclassified,
    Classified(MediaType),
    LinkedToBranch(MediaType),
    LinkedToMuxer(MediaType),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MuxerLink {
    Linked(PortRef),
    /// The encoder already feeds the muxer.
    AlreadyLinked,
    Failed(String),
}

/// What handling one discovered port did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discovery {
    /// Caps not negotiated yet, nothing done.
    Ignored,
    /// Neither raw audio nor raw video; the stream is dropped.
    Unsupported(Caps),
    /// The branch link failed, so the muxer link was not attempted.
    BranchLinkFailed { media: MediaType, reason: String },
    /// `branch` is `AlreadyLinked` for a replay, or for a second stream of a
    /// type whose branch is taken.
    Linked {
        media: MediaType,
        branch: LinkOutcome,
        muxer: MuxerLink,
    },
}

/// Connects ports appearing on the source into the audio or video branch,
/// then connects that branch's encoder into a fresh muxer input.
///
/// Failures are logged and reported in the returned [`Discovery`]; they
/// never stop the rest of the graph.
#[derive(Debug, Default)]
pub struct Linker {
    streams: HashMap<PortRef, StreamState>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_state(&self, port: &PortRef) -> StreamState {
        self.streams
            .get(port)
            .copied()
            .unwrap_or(StreamState::Unclassified)
    }

    pub fn handle_new_port(
        &mut self,
        graph: &mut Graph,
        branches: &BranchTable,
        port: &PortRef,
    ) -> Discovery {
        let label = graph.describe(port);
        log::info!("received new port '{}'", label);

        let Some(caps) = graph.port(port).and_then(|p| p.caps()).cloned() else {
            log::info!("'{}' has no negotiated caps yet, ignoring", label);
            return Discovery::Ignored;
        };
        let Some(media) = classify(&caps).media_type() else {
            log::info!(
                "'{}' has type '{}' which is not raw audio or raw video, ignoring",
                label,
                caps
            );
            return Discovery::Unsupported(caps);
        };
        let state = self
            .streams
            .entry(port.clone())
            .or_insert(StreamState::Unclassified);
        if *state == StreamState::Unclassified {
            *state = StreamState::Classified(media);
        }

        let branch = branches.branch(media);
        let outcome = graph.link(port, &branch.entry);
        match outcome {
            LinkOutcome::Linked => {
                log::info!("link succeeded (type '{}')", caps);
                self.streams
                    .insert(port.clone(), StreamState::LinkedToBranch(media));
            }
            LinkOutcome::AlreadyLinked => {
                log::info!("{} branch is already linked, ignoring '{}'", media, label);
            }
            LinkOutcome::Incompatible => {
                let err = Error::DynamicLinkFailure(format!(
                    "type is '{}' but linking {} to {} failed",
                    caps,
                    label,
                    graph.describe(&branch.entry)
                ));
                log::warn!("{}", err);
                return Discovery::BranchLinkFailed {
                    media,
                    reason: err.to_string(),
                };
            }
        }

        let muxer = self.link_muxer(graph, branches, media, port);
        Discovery::Linked {
            media,
            branch: outcome,
            muxer,
        }
    }

    // Done right after the branch link (or a replay of it), before any data
    // flows. Never requests a second muxer input for the same encoder.
    fn link_muxer(
        &mut self,
        graph: &mut Graph,
        branches: &BranchTable,
        media: MediaType,
        port: &PortRef,
    ) -> MuxerLink {
        let branch = branches.branch(media);
        if graph.is_linked(&branch.encoder_src) {
            log::debug!("{} encoder already feeds the muxer", media);
            return MuxerLink::AlreadyLinked;
        }
        let mux_port = match graph.request_port(branches.muxer, media.muxer_template()) {
            Ok(mux_port) => mux_port,
            Err(e) => {
                log::warn!("failed to link {} encoder to muxer: {}", media, e);
                return MuxerLink::Failed(e.to_string());
            }
        };
        match graph.link(&branch.encoder_src, &mux_port) {
            LinkOutcome::Linked => {
                log::info!(
                    "linked {} to {}",
                    graph.describe(&branch.encoder_src),
                    graph.describe(&mux_port)
                );
                if self.stream_state(port) == StreamState::LinkedToBranch(media) {
                    self.streams
                        .insert(port.clone(), StreamState::LinkedToMuxer(media));
                }
                MuxerLink::Linked(mux_port)
            }
            LinkOutcome::AlreadyLinked => MuxerLink::AlreadyLinked,
            LinkOutcome::Incompatible => {
                let err = Error::DynamicLinkFailure(format!(
                    "failed to link {} encoder to {}",
                    media,
                    graph.describe(&mux_port)
                ));
                log::warn!("{}", err);
                MuxerLink::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
#[path = "linker_test.rs"]
mod linker_test;
