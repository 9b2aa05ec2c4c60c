use std::collections::BTreeSet;

use crate::bus::{Message, State};
use crate::caps::{AUDIO_RAW, Caps, VIDEO_RAW};
use crate::catalog::{Catalog, NodeFactory};
use crate::error::Error;
use crate::graph::{Graph, LinkOutcome};

fn graph_with(nodes: &[(&str, &str)]) -> anyhow::Result<Graph> {
    let catalog = Catalog::new();
    let mut graph = Graph::new("test");
    for (factory, name) in nodes {
        graph.add(catalog.create(factory, name)?)?;
    }
    Ok(graph)
}

#[test]
fn test_duplicate_name_rejected() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("queue", "q")])?;
    let err = graph.add(Catalog::new().create("queue", "q")?).unwrap_err();
    assert!(matches!(err, Error::ConstructionFailure(_)));
    Ok(())
}

#[test]
fn test_input_takes_one_link() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("queue", "a"), ("queue", "b"), ("queue", "c")])?;
    let (a, b, c) = (graph.lookup("a")?, graph.lookup("b")?, graph.lookup("c")?);
    let b_sink = graph.static_port(b, "sink")?;

    let (a_src, c_src) = (graph.static_port(a, "src")?, graph.static_port(c, "src")?);

    assert_eq!(graph.link(&a_src, &b_sink), LinkOutcome::Linked);
    assert_eq!(graph.link(&c_src, &b_sink), LinkOutcome::AlreadyLinked);
    assert_eq!(graph.links().len(), 1);
    assert_eq!(graph.links()[0].src.node, a);
    assert!(!graph.is_linked(&c_src));
    Ok(())
}

#[test]
fn test_audio_into_video_is_incompatible() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("voaacenc", "aenc"), ("videoconvert", "vconv")])?;
    let src = graph.static_port(graph.lookup("aenc")?, "src")?;
    let sink = graph.static_port(graph.lookup("vconv")?, "sink")?;
    assert_eq!(graph.link(&src, &sink), LinkOutcome::Incompatible);
    assert!(graph.links().is_empty());
    assert!(!graph.is_linked(&src) && !graph.is_linked(&sink));
    Ok(())
}

#[test]
fn test_wrong_direction_is_incompatible() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("queue", "a"), ("queue", "b")])?;
    let a_sink = graph.static_port(graph.lookup("a")?, "sink")?;
    let b_sink = graph.static_port(graph.lookup("b")?, "sink")?;
    assert_eq!(graph.link(&a_sink, &b_sink), LinkOutcome::Incompatible);
    Ok(())
}

#[test]
fn test_request_ports() -> anyhow::Result<()> {
    let catalog = Catalog::new();
    let mut graph = Graph::new("test");
    let tee = graph.add(catalog.create("tee", "tee")?)?;
    let mux = graph.add(Catalog::new().with_request_limit(1).create("mp4mux", "mux")?)?;

    let first = graph.request_port(tee, "src_%u")?;
    let second = graph.request_port(tee, "src_%u")?;
    assert_eq!((first.name.as_str(), second.name.as_str()), ("src_0", "src_1"));
    assert!(!graph.is_linked(&first));

    let err = graph.request_port(tee, "audio_%u").unwrap_err();
    assert!(matches!(err, Error::RequestRejected { .. }));

    assert_eq!(graph.request_port(mux, "video_%u")?.name, "video_0");
    match graph.request_port(mux, "audio_%u") {
        Err(Error::RequestRejected { reason, .. }) => assert!(reason.contains("limit")),
        other => panic!("expected rejection, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_static_port_lookup() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("tee", "tee")])?;
    let tee = graph.lookup("tee")?;
    assert!(graph.static_port(tee, "sink").is_ok());
    let requested = graph.request_port(tee, "src_%u")?;
    assert!(matches!(
        graph.static_port(tee, &requested.name),
        Err(Error::PortNotFound { .. })
    ));
    assert!(matches!(graph.lookup("nope"), Err(Error::NodeNotFound(_))));
    Ok(())
}

#[test]
fn test_expose_port_twice_returns_same_port() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("uridecodebin", "source")])?;
    let source = graph.lookup("source")?;
    let first = graph.expose_port(source, "src_0", Some(Caps::new(AUDIO_RAW)))?;
    let again = graph.expose_port(source, "src_0", Some(Caps::new(VIDEO_RAW)))?;
    assert_eq!(first, again);
    let caps = graph.port(&first).and_then(|p| p.caps()).cloned();
    assert_eq!(caps, Some(Caps::new(AUDIO_RAW)));
    assert!(graph.expose_port(source, "sink", None).is_err());
    Ok(())
}

#[test]
fn test_link_many() -> anyhow::Result<()> {
    let mut graph = graph_with(&[
        ("queue", "q"),
        ("audioconvert", "conv"),
        ("autoaudiosink", "out"),
        ("autovideosink", "vout"),
    ])?;
    graph.link_many(&["q", "conv", "out"])?;
    assert_eq!(graph.links().len(), 2);

    match graph.link_many(&["q", "vout"]) {
        Err(Error::ConstructionFailure(msg)) => assert!(msg.contains("q to vout")),
        other => panic!("expected failure, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_downstream_sinks() -> anyhow::Result<()> {
    let mut graph = graph_with(&[
        ("tee", "tee"),
        ("fakesink", "a"),
        ("fakesink", "b"),
        ("fakesink", "unlinked"),
    ])?;
    let tee = graph.lookup("tee")?;
    for name in ["a", "b"] {
        let src = graph.request_port(tee, "src_%u")?;
        let sink = graph.static_port(graph.lookup(name)?, "sink")?;
        assert_eq!(graph.link(&src, &sink), LinkOutcome::Linked);
    }
    assert_eq!(
        graph.downstream_sinks(tee),
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );
    assert!(graph.downstream_sinks(graph.lookup("a")?).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_state_steps_are_posted() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("queue", "q")])?;
    let mut bus = graph.take_bus().expect("bus");
    graph.set_state(State::Playing)?;
    assert_eq!(graph.state(), State::Playing);

    let mut root = Vec::new();
    while let Some(message) = bus.try_pop() {
        if let Message::StateChanged {
            src,
            old,
            new,
            pending,
        } = message
        {
            if src == "test" {
                root.push((old, new, pending));
            }
        }
    }
    assert_eq!(
        root,
        vec![
            (State::Null, State::Ready, State::Playing),
            (State::Ready, State::Paused, State::Playing),
            (State::Paused, State::Playing, State::VoidPending),
        ]
    );
    Ok(())
}

#[test]
fn test_missing_location_rejects_ready() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("filesink", "file-sink")])?;
    match graph.set_state(State::Ready) {
        Err(Error::TransitionRejected { node, target, .. }) => {
            assert_eq!(node, "file-sink");
            assert_eq!(target, State::Ready);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(graph.state(), State::Null);
    Ok(())
}

#[test]
fn test_playing_needs_runtime() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("queue", "q")])?;
    assert!(matches!(
        graph.set_state(State::Playing),
        Err(Error::TransitionRejected {
            target: State::Playing,
            ..
        })
    ));
    assert_eq!(graph.state(), State::Paused);
    Ok(())
}

#[tokio::test]
async fn test_teardown_once() -> anyhow::Result<()> {
    let mut graph = graph_with(&[("queue", "a"), ("queue", "b")])?;
    graph.link_many(&["a", "b"])?;
    let mut bus = graph.take_bus().expect("bus");
    graph.set_state(State::Playing)?;
    while bus.try_pop().is_some() {}

    assert!(graph.teardown());
    assert!(!graph.teardown());
    graph.set_state(State::Null)?;
    assert!(graph.is_torn_down());
    assert_eq!(graph.state(), State::Null);
    assert!(graph.links().is_empty());
    assert_eq!(graph.nodes().count(), 0);

    let mut to_null = 0;
    while let Some(message) = bus.try_pop() {
        if let Message::StateChanged { new: State::Null, .. } = message {
            to_null += 1;
        }
    }
    assert_eq!(to_null, 1);

    assert!(graph.set_state(State::Playing).is_err());
    let tmp = Catalog::new().create("queue", "late")?;
    assert!(graph.add(tmp).is_err());
    Ok(())
}

#[test]
fn test_source_has_no_inbox() -> anyhow::Result<()> {
    let graph = graph_with(&[("uridecodebin", "source"), ("queue", "q")])?;
    let (source, queue) = (graph.lookup("source")?, graph.lookup("q")?);
    assert!(!graph.inboxes.contains_key(&source));
    assert!(!graph.pending_inboxes.contains_key(&source));
    assert!(graph.inboxes.contains_key(&queue));
    Ok(())
}

#[tokio::test]
async fn test_shutdown_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.bin");
    let mut graph = graph_with(&[("queue", "q")])?;
    let mut sink = Catalog::new().create("filesink", "file-sink")?;
    sink.set_property("location", path.to_string_lossy());
    graph.add(sink)?;
    graph.link_many(&["q", "file-sink"])?;
    graph.set_state(State::Playing)?;

    assert!(graph.shutdown().await);
    assert!(!graph.shutdown().await);
    assert!(!graph.teardown());
    assert!(graph.is_torn_down());
    assert_eq!(graph.nodes().count(), 0);
    assert!(path.exists());
    Ok(())
}
