use std::fs::File;
use std::io::{BufWriter, Write};

use crate::{
    buffer::Buffer,
    element::{Element, ElementContext},
    node::Properties,
};

/// Terminal sink standing in for an audio/video renderer: consumes and
/// counts what it is given.
#[derive(Default)]
pub struct DisplaySink {
    rendered: u64,
    bytes: usize,
}

impl Element for DisplaySink {
    fn chain(
        &mut self,
        _pad: &str,
        buffer: Buffer,
        ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()> {
        self.rendered += 1;
        self.bytes += buffer.size();
        log::trace!("{} render pts {} ({})", ctx.name(), buffer.pts(), buffer.caps());
        Ok(())
    }

    fn eos(&mut self, _pad: &str, ctx: &mut ElementContext<'_>) -> anyhow::Result<()> {
        log::info!(
            "{}: rendered {} buffers, {} bytes",
            ctx.name(),
            self.rendered,
            self.bytes
        );
        ctx.post_sink_eos();
        Ok(())
    }
}

/// Writes every buffer's payload to the file named by the `location`
/// property. The file is created when the graph leaves NULL.
#[derive(Default)]
pub struct FileSink {
    location: Option<String>,
    writer: Option<BufWriter<File>>,
    written: usize,
}

impl Element for FileSink {
    fn start(&mut self, props: &Properties) -> anyhow::Result<()> {
        let location = props
            .get("location")
            .ok_or_else(|| anyhow::anyhow!("no location set"))?;
        let file = File::create(location)
            .map_err(|e| anyhow::anyhow!("could not open {} for writing: {}", location, e))?;
        self.writer = Some(BufWriter::new(file));
        self.location = Some(location.clone());
        Ok(())
    }

    fn chain(
        &mut self,
        _pad: &str,
        buffer: Buffer,
        _ctx: &mut ElementContext<'_>,
    ) -> anyhow::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("file sink not started"))?;
        writer.write_all(buffer.data())?;
        self.written += buffer.size();
        Ok(())
    }

    fn eos(&mut self, _pad: &str, ctx: &mut ElementContext<'_>) -> anyhow::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        log::info!(
            "{}: wrote {} bytes to {}",
            ctx.name(),
            self.written,
            self.location.as_deref().unwrap_or("?")
        );
        ctx.post_sink_eos();
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
