use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Result, Write};
use std::path::Path;

use crate::mem::dispatcher::PortId;
use crate::mem::packet::{Packet, Tick};

/// Writes one JSON line per packet offered across a dispatcher link.
pub struct TraceWriter {
  writer: BufWriter<File>,
}

impl TraceWriter {
  pub fn create(path: &Path) -> Result<Self> {
    Ok(Self {
      writer: BufWriter::new(File::create(path)?),
    })
  }

  pub fn record(&mut self, tick: Tick, link: PortId, pkt: &Packet, accepted: bool) -> Result<()> {
    let direction = if pkt.is_request() { "request" } else { "response" };
    let entry = json!({
      "tick": tick,
      "link": link.to_string(),
      "direction": direction,
      "packet": pkt,
      "accepted": accepted,
    });
    writeln!(self.writer, "{}", entry)
  }

  pub fn flush(&mut self) -> Result<()> {
    self.writer.flush()
  }
}
