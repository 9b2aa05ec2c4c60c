use std::collections::{BTreeMap, BTreeSet};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    buffer::{Buffer, BufferCmd},
    caps::Caps,
    element::{Element, ElementContext},
};

pub const MUX_CAPS: &str = "video/quicktime";
pub const HEADER_MAGIC: &[u8; 4] = b"TRMX";
pub const TRAILER_MAGIC: &[u8; 4] = b"TEND";
const VERSION: u8 = 1;

/// Interleaves buffers from its requested inputs into one framed byte
/// stream on `src`:
///
/// ```text
/// header  : "TRMX" version:u8
/// record  : pad_len:u8 pad pts:i64be len:u32be payload
/// trailer : "TEND" records:u32be
/// ```
///
/// The trailer and end-of-stream go out once every linked input finished.
#[derive(Default)]
pub struct Muxer {
    have_written_header: bool,
    have_written_trailer: bool,
    records: BTreeMap<String, u32>,
    finished: BTreeSet<String>,
}

impl Muxer {
    fn emit(ctx: &mut ElementContext<'_>, data: Bytes) {
        ctx.push(
            "src",
            BufferCmd::Data(Buffer::new(Caps::new(MUX_CAPS), 0, data)),
        );
    }

    fn write_header(&mut self, ctx: &mut ElementContext<'_>) {
        if !self.have_written_header {
            self.have_written_header = true;
            let mut header = BytesMut::with_capacity(5);
            header.put_slice(HEADER_MAGIC);
            header.put_u8(VERSION);
            Self::emit(ctx, header.freeze());
        }
    }

    fn finish(&mut self, ctx: &mut ElementContext<'_>) {
        if self.have_written_trailer {
            return;
        }
        self.write_header(ctx);
        self.have_written_trailer = true;
        let total: u32 = self.records.values().sum();
        let mut trailer = BytesMut::with_capacity(8);
        trailer.put_slice(TRAILER_MAGIC);
        trailer.put_u32(total);
        Self::emit(ctx, trailer.freeze());
        log::info!("{}: muxed {:?}", ctx.name(), self.records);
        ctx.push("src", BufferCmd::Eos);
    }
}

pub fn encode_record(pad: &str, pts: i64, payload: &[u8]) -> anyhow::Result<Bytes> {
    let pad_len = u8::try_from(pad.len())
        .map_err(|_| anyhow::anyhow!("pad name too long: {}", pad))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| anyhow::anyhow!("payload too large: {} bytes", payload.len()))?;
    let mut record = BytesMut::with_capacity(1 + pad.len() + 12 + payload.len());
    record.put_u8(pad_len);
    record.put_slice(pad.as_bytes());
    record.put_i64(pts);
    record.put_u32(len);
    record.put_slice(payload);
    Ok(record.freeze())
}

impl Element for Muxer {
    fn chain(
        &mut self,
        pad: &str,
        buffer: Buffer,
        ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()> {
        if self.have_written_trailer {
            anyhow::bail!("buffer on {} after trailer was written", pad);
        }
        self.write_header(ctx);
        let record = encode_record(pad, buffer.pts(), buffer.data())?;
        *self.records.entry(pad.to_string()).or_insert(0) += 1;
        Self::emit(ctx, record);
        Ok(())
    }

    fn eos(&mut self, pad: &str, ctx: &mut ElementContext<'_>) -> anyhow::Result<()> {
        self.finished.insert(pad.to_string());
        if !self.records.contains_key(pad) {
            ctx.warn(format!("{} finished without any data", pad));
        }
        let linked = ctx.linked_inputs();
        if linked.is_subset(&self.finished) {
            self.finish(ctx);
        } else {
            log::debug!(
                "{}: {} finished, waiting for {:?}",
                ctx.name(),
                pad,
                linked.difference(&self.finished).collect::<Vec<_>>()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "muxer_test.rs"]
mod muxer_test;
