use crate::{
    caps::{Caps, CapsFilter},
    element::{Encode, Passthrough},
    error::{Error, Result},
    muxer::Muxer,
    node::{Behavior, Direction, Node, NodeKind, PortTemplate, Presence},
    sink::{DisplaySink, FileSink},
    source::GeneratorSource,
    tee::Tee,
};

/// Instantiates processing nodes by factory name.
pub trait NodeFactory {
    fn create(&self, factory: &str, name: &str) -> Result<Node>;
}

/// Built-in factories used by the recorder:
///
/// | factory                          | kind        | ports                              |
/// |----------------------------------|-------------|------------------------------------|
/// | `uridecodebin`                   | Source      | `src_%u` (sometimes)               |
/// | `queue`                          | Queue       | `sink`, `src`                      |
/// | `tee`                            | BranchPoint | `sink`, `src_%u` (request)         |
/// | `audioconvert`, `videoconvert`   | Converter   | `sink`, `src`                      |
/// | `voaacenc`, `x264enc`            | Encoder     | `sink`, `src`                      |
/// | `mp4mux`                         | Muxer       | `audio_%u`, `video_%u` (request), `src` |
/// | `filesink`, `fakesink`, `auto*sink` | Sink     | `sink`                             |
#[derive(Clone, Debug)]
pub struct Catalog {
    queue_capacity: usize,
    request_limit: Option<usize>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            request_limit: None,
        }
    }
}

fn sink_pad(filter: CapsFilter) -> PortTemplate {
    PortTemplate::always("sink", Direction::Input, filter)
}

fn src_pad(filter: CapsFilter) -> PortTemplate {
    PortTemplate::always("src", Direction::Output, filter)
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inbox size of `queue` nodes.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Upper bound on request ports per node; unbounded by default.
    pub fn with_request_limit(mut self, limit: usize) -> Self {
        self.request_limit = Some(limit);
        self
    }

    fn converter(name: &str, factory: &str, family: &str) -> Node {
        Node::new(
            name,
            factory,
            NodeKind::Converter,
            vec![
                sink_pad(CapsFilter::family(family)),
                src_pad(CapsFilter::family(family)),
            ],
            Behavior::Element(Box::new(Passthrough)),
        )
    }

    fn encoder(name: &str, factory: &str, family: &str, output: &str) -> Node {
        Node::new(
            name,
            factory,
            NodeKind::Encoder,
            vec![
                sink_pad(CapsFilter::family(family)),
                src_pad(CapsFilter::family(family)),
            ],
            Behavior::Element(Box::new(Encode::new(family, Caps::new(output)))),
        )
    }

    fn display(name: &str, factory: &str, filter: CapsFilter) -> Node {
        Node::new(
            name,
            factory,
            NodeKind::Sink,
            vec![sink_pad(filter)],
            Behavior::Element(Box::<DisplaySink>::default()),
        )
    }
}

impl NodeFactory for Catalog {
    fn create(&self, factory: &str, name: &str) -> Result<Node> {
        let node = match factory {
            "uridecodebin" => Node::new(
                name,
                factory,
                NodeKind::Source,
                vec![PortTemplate::new(
                    "src_%u",
                    Direction::Output,
                    Presence::Sometimes,
                    CapsFilter::Any,
                )],
                Behavior::Source(Box::<GeneratorSource>::default()),
            ),
            "queue" => Node::new(
                name,
                factory,
                NodeKind::Queue,
                vec![sink_pad(CapsFilter::Any), src_pad(CapsFilter::Any)],
                Behavior::Element(Box::new(Passthrough)),
            )
            .with_inbox_capacity(self.queue_capacity),
            "tee" => Node::new(
                name,
                factory,
                NodeKind::BranchPoint,
                vec![
                    sink_pad(CapsFilter::Any),
                    PortTemplate::new(
                        "src_%u",
                        Direction::Output,
                        Presence::Request,
                        CapsFilter::Any,
                    ),
                ],
                Behavior::Element(Box::<Tee>::default()),
            ),
            "audioconvert" => Self::converter(name, factory, "audio"),
            "videoconvert" => Self::converter(name, factory, "video"),
            "voaacenc" => Self::encoder(name, factory, "audio", "audio/mpeg"),
            "x264enc" => Self::encoder(name, factory, "video", "video/x-h264"),
            "mp4mux" => Node::new(
                name,
                factory,
                NodeKind::Muxer,
                vec![
                    PortTemplate::new(
                        "audio_%u",
                        Direction::Input,
                        Presence::Request,
                        CapsFilter::family("audio"),
                    ),
                    PortTemplate::new(
                        "video_%u",
                        Direction::Input,
                        Presence::Request,
                        CapsFilter::family("video"),
                    ),
                    src_pad(CapsFilter::Any),
                ],
                Behavior::Element(Box::<Muxer>::default()),
            ),
            "filesink" => Node::new(
                name,
                factory,
                NodeKind::Sink,
                vec![sink_pad(CapsFilter::Any)],
                Behavior::Element(Box::<FileSink>::default()),
            ),
            "autoaudiosink" => Self::display(name, factory, CapsFilter::family("audio")),
            "autovideosink" => Self::display(name, factory, CapsFilter::family("video")),
            "fakesink" => Self::display(name, factory, CapsFilter::Any),
            _ => {
                log::error!("no such factory: {}", factory);
                return Err(Error::InstantiationFailure {
                    factory: factory.to_string(),
                    name: name.to_string(),
                });
            }
        };
        Ok(match self.request_limit {
            Some(limit) => node.with_request_limit(limit),
            None => node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_known_factories() {
        let catalog = Catalog::new();
        let tee = catalog.create("tee", "t").unwrap();
        assert_eq!(tee.kind(), NodeKind::BranchPoint);
        assert_eq!(tee.ports().len(), 1, "request ports are not created upfront");

        let mux = catalog.create("mp4mux", "mux").unwrap();
        assert_eq!(mux.kind(), NodeKind::Muxer);
        assert!(mux.port("src").is_some());
        assert!(mux.port("audio_0").is_none());

        let source = catalog.create("uridecodebin", "source").unwrap();
        assert!(source.ports().is_empty());
    }

    #[test]
    fn test_unknown_factory_fails() {
        let err = Catalog::new().create("vp9enc", "enc").unwrap_err();
        assert!(matches!(err, Error::InstantiationFailure { .. }));
        assert!(err.to_string().contains("vp9enc"));
    }
}
