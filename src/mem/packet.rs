//! Transaction packets and the identities used to tag them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated time, in ticks.
pub type Tick = u64;

/// Unique id of a transaction; a response carries the id of its request.
pub type PacketId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
  Request,
  Response,
}

/// Upstream requesters that can feed the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Requester {
  RemappingTable,
  MigrationManager,
}

impl Requester {
  pub const ALL: [Requester; 2] = [Requester::RemappingTable, Requester::MigrationManager];

  pub fn index(self) -> usize {
    self as usize
  }
}

/// Physical backing stores behind the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
  Fast,
  Slow,
}

impl Tier {
  pub const ALL: [Tier; 2] = [Tier::Fast, Tier::Slow];

  pub fn index(self) -> usize {
    self as usize
  }
}

/// Downstream resources a request can contend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
  AccessCounter,
  Storage(Tier),
}

impl Resource {
  pub const ALL: [Resource; 3] = [
    Resource::AccessCounter,
    Resource::Storage(Tier::Fast),
    Resource::Storage(Tier::Slow),
  ];
}

impl From<Tier> for Resource {
  fn from(tier: Tier) -> Self {
    Resource::Storage(tier)
  }
}

impl fmt::Display for Requester {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Requester::RemappingTable => write!(f, "remapping_table"),
      Requester::MigrationManager => write!(f, "migration_manager"),
    }
  }
}

impl fmt::Display for Tier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Tier::Fast => write!(f, "fast_tier"),
      Tier::Slow => write!(f, "slow_tier"),
    }
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Resource::AccessCounter => write!(f, "access_counter"),
      Resource::Storage(tier) => tier.fmt(f),
    }
  }
}

/// A memory transaction travelling through the node.
///
/// `origin` is stamped by the upstream link that admitted the request and
/// `dest` by the downstream link that admitted the response. Neither is
/// overwritten once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
  pub id: PacketId,
  pub addr: u64,
  pub size: u32,
  pub cmd: Command,
  pub origin: Option<Requester>,
  pub dest: Option<Tier>,
}

impl Packet {
  pub fn request(id: PacketId, addr: u64, size: u32) -> Self {
    Self {
      id,
      addr,
      size,
      cmd: Command::Request,
      origin: None,
      dest: None,
    }
  }

  pub fn is_request(&self) -> bool {
    self.cmd == Command::Request
  }

  pub fn is_response(&self) -> bool {
    self.cmd == Command::Response
  }

  /// Turn a serviced request into its response, keeping the routing tags.
  pub fn make_response(&mut self) {
    self.cmd = Command::Response;
  }

  pub fn stamp_origin(&mut self, origin: Requester) {
    match self.origin {
      None => self.origin = Some(origin),
      Some(prev) => assert_eq!(
        prev, origin,
        "packet {} already tagged with origin {}, refusing {}",
        self.id, prev, origin
      ),
    }
  }

  pub fn stamp_dest(&mut self, dest: Tier) {
    match self.dest {
      None => self.dest = Some(dest),
      Some(prev) => assert_eq!(
        prev, dest,
        "packet {} already tagged with dest {}, refusing {}",
        self.id, prev, dest
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn response_keeps_tags() {
    let mut pkt = Packet::request(7, 0x40, 64);
    pkt.stamp_origin(Requester::MigrationManager);
    pkt.stamp_dest(Tier::Slow);
    pkt.make_response();
    assert!(pkt.is_response());
    assert_eq!(pkt.origin, Some(Requester::MigrationManager));
    assert_eq!(pkt.dest, Some(Tier::Slow));
  }

  #[test]
  fn restamping_same_tag_is_allowed() {
    let mut pkt = Packet::request(1, 0, 64);
    pkt.stamp_origin(Requester::RemappingTable);
    pkt.stamp_origin(Requester::RemappingTable);
    assert_eq!(pkt.origin, Some(Requester::RemappingTable));
  }

  #[test]
  #[should_panic(expected = "already tagged with origin")]
  fn origin_is_never_overwritten() {
    let mut pkt = Packet::request(1, 0, 64);
    pkt.stamp_origin(Requester::RemappingTable);
    pkt.stamp_origin(Requester::MigrationManager);
  }
}
