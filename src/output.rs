//! JSON-lines rendering of stream events.

use std::io::Write;

use anyhow::Result;
use chanflux_types::StreamEvent;

/// Write one event as a single line of JSON.
pub fn write_event<W: Write>(out: &mut W, event: &StreamEvent) -> Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
