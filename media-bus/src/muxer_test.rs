use bytes::Buf;
use tokio::sync::mpsc;

use crate::buffer::{Buffer, BufferCmd, InboxReceiver};
use crate::bus::{Bus, Message};
use crate::caps::Caps;
use crate::element::{Element, ElementContext};
use crate::muxer::{HEADER_MAGIC, Muxer, TRAILER_MAGIC, encode_record};
use crate::node::{NodeId, PortRef};
use crate::router::Router;

const MUX: NodeId = NodeId(0);

/// Router with the muxer's `src` and two requested inputs linked.
fn wired() -> (Router, InboxReceiver) {
    let router = Router::default();
    let (tx, rx) = mpsc::channel(16);
    router.connect(PortRef::new(MUX, "src"), PortRef::new(NodeId(9), "sink"), tx);
    for (i, pad) in ["audio_0", "video_0"].into_iter().enumerate() {
        let (upstream, _) = mpsc::channel(1);
        let sink = PortRef::new(MUX, pad);
        router.connect(PortRef::new(NodeId(i + 1), "src"), sink, upstream);
    }
    (router, rx)
}

async fn feed(
    muxer: &mut Muxer,
    router: &Router,
    bus: &Bus,
    pad: &str,
    cmd: BufferCmd,
) -> anyhow::Result<()> {
    let mut ctx = ElementContext::new(MUX, "muxer", router);
    match cmd {
        BufferCmd::Data(buffer) => muxer.chain(pad, buffer, &mut ctx)?,
        BufferCmd::Eos => muxer.eos(pad, &mut ctx)?,
    }
    ctx.flush(&bus.poster()).await;
    Ok(())
}

fn drain(rx: &mut InboxReceiver) -> Vec<BufferCmd> {
    std::iter::from_fn(|| rx.try_recv().ok().map(|i| i.cmd)).collect()
}

#[test]
fn test_record_layout() -> anyhow::Result<()> {
    let mut record = encode_record("audio_0", -2, b"abc")?;
    assert_eq!(record.get_u8(), 7);
    assert_eq!(&record.split_to(7)[..], b"audio_0");
    assert_eq!(record.get_i64(), -2);
    assert_eq!(record.get_u32(), 3);
    assert_eq!(&record[..], b"abc");

    assert!(encode_record(&"x".repeat(300), 0, b"").is_err());
    Ok(())
}

#[tokio::test]
async fn test_trailer_waits_for_every_input() -> anyhow::Result<()> {
    let (router, mut rx) = wired();
    let mut bus = Bus::new("pipe");
    let mut muxer = Muxer::default();
    let a0 = Buffer::new(Caps::new("audio/mpeg"), 0, "a0");

    feed(&mut muxer, &router, &bus, "audio_0", BufferCmd::Data(a0.clone())).await?;
    feed(&mut muxer, &router, &bus, "audio_0", BufferCmd::Eos).await?;
    let out = drain(&mut rx);
    assert_eq!(out.len(), 2, "header and one record");
    match &out[0] {
        BufferCmd::Data(header) => assert_eq!(&header.data()[..4], HEADER_MAGIC),
        BufferCmd::Eos => panic!("expected header"),
    }
    assert_eq!(bus.try_pop(), None);

    feed(&mut muxer, &router, &bus, "video_0", BufferCmd::Eos).await?;
    let out = drain(&mut rx);
    match &out[..] {
        [BufferCmd::Data(trailer), BufferCmd::Eos] => {
            assert_eq!(&trailer.data()[..4], TRAILER_MAGIC);
            assert_eq!(&trailer.data()[4..], &1u32.to_be_bytes());
        }
        other => panic!("unexpected {:?}", other),
    }
    match bus.try_pop() {
        Some(Message::Warning { src, message }) => {
            assert_eq!(src, "muxer");
            assert!(message.contains("video_0"), "{}", message);
        }
        other => panic!("expected a warning, got {:?}", other),
    }

    let late = feed(&mut muxer, &router, &bus, "video_0", BufferCmd::Data(a0)).await;
    assert!(late.is_err());
    Ok(())
}
