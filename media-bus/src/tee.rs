use crate::{
    buffer::{Buffer, BufferCmd},
    element::{Element, ElementContext},
};

/// Branch point: every buffer accepted on `sink` is duplicated to each
/// output port linked at that moment.
///
/// Delivery waits for room in every peer's inbox, so a slow branch slows
/// the tee instead of losing buffers. Branches are decoupled by the queue
/// placed behind each requested output.
#[derive(Default)]
pub struct Tee {
    pushed: u64,
}

impl Tee {
    pub fn pushed(&self) -> u64 {
        self.pushed
    }
}

impl Element for Tee {
    fn chain(
        &mut self,
        _pad: &str,
        buffer: Buffer,
        ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()> {
        self.pushed += 1;
        ctx.push_all(BufferCmd::Data(buffer));
        Ok(())
    }
}

#[cfg(test)]
#[path = "tee_test.rs"]
mod tee_test;
