use serde::Serialize;

use crate::mem::packet::Tick;

/// One entry of a node's activity log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
  pub tick: Tick,
  pub action: String,
  pub subject: String,
}

/// Macro to push a Record with common fields
///
/// Usage:
/// ```ignore
/// node_record!(self, tick, "action_name", "subject string");
/// node_record!(self, tick, "action_name", format!("formatted {}", value));
/// ```
#[macro_export]
macro_rules! node_record {
  ($self:expr, $tick:expr, $action:expr, $subject:expr) => {
    $self.records.push($crate::simulator::sim::records::Record {
      tick: $tick,
      action: $action.to_string(),
      subject: $subject.to_string(),
    });
  };
}
