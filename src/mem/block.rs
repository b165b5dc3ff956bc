//! Per link-pair backpressure flags of the dispatcher.

use serde::Serialize;
use std::fmt;

use super::packet::{Requester, Resource, Tier};

/// Every (source, contended resource) pair that can stall independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockKey {
  RtToAc,
  MmToAc,
  RtToFast,
  MmToFast,
  RtToSlow,
  MmToSlow,

  FastToRt,
  SlowToRt,
  FastToMm,
  SlowToMm,
}

impl BlockKey {
  pub const COUNT: usize = 10;

  pub const ALL: [BlockKey; BlockKey::COUNT] = [
    BlockKey::RtToAc,
    BlockKey::MmToAc,
    BlockKey::RtToFast,
    BlockKey::MmToFast,
    BlockKey::RtToSlow,
    BlockKey::MmToSlow,
    BlockKey::FastToRt,
    BlockKey::SlowToRt,
    BlockKey::FastToMm,
    BlockKey::SlowToMm,
  ];

  /// Request from `origin` blocked by `resource`.
  pub fn request(origin: Requester, resource: Resource) -> Self {
    use Requester::*;
    match (origin, resource) {
      (RemappingTable, Resource::AccessCounter) => BlockKey::RtToAc,
      (MigrationManager, Resource::AccessCounter) => BlockKey::MmToAc,
      (RemappingTable, Resource::Storage(Tier::Fast)) => BlockKey::RtToFast,
      (MigrationManager, Resource::Storage(Tier::Fast)) => BlockKey::MmToFast,
      (RemappingTable, Resource::Storage(Tier::Slow)) => BlockKey::RtToSlow,
      (MigrationManager, Resource::Storage(Tier::Slow)) => BlockKey::MmToSlow,
    }
  }

  /// Response from `tier` blocked by requester `dest`.
  pub fn response(tier: Tier, dest: Requester) -> Self {
    use Requester::*;
    match (tier, dest) {
      (Tier::Fast, RemappingTable) => BlockKey::FastToRt,
      (Tier::Slow, RemappingTable) => BlockKey::SlowToRt,
      (Tier::Fast, MigrationManager) => BlockKey::FastToMm,
      (Tier::Slow, MigrationManager) => BlockKey::SlowToMm,
    }
  }

  pub fn is_request(self) -> bool {
    (self as usize) < BlockKey::FastToRt as usize
  }
}

impl fmt::Display for BlockKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BlockKey::RtToAc => "remapping_table->access_counter",
      BlockKey::MmToAc => "migration_manager->access_counter",
      BlockKey::RtToFast => "remapping_table->fast_tier",
      BlockKey::MmToFast => "migration_manager->fast_tier",
      BlockKey::RtToSlow => "remapping_table->slow_tier",
      BlockKey::MmToSlow => "migration_manager->slow_tier",
      BlockKey::FastToRt => "fast_tier->remapping_table",
      BlockKey::SlowToRt => "slow_tier->remapping_table",
      BlockKey::FastToMm => "fast_tier->migration_manager",
      BlockKey::SlowToMm => "slow_tier->migration_manager",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Default)]
pub struct BlockMatrix {
  flags: [bool; BlockKey::COUNT],
}

impl BlockMatrix {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: BlockKey) -> bool {
    self.flags[key as usize]
  }

  pub fn set(&mut self, key: BlockKey) {
    self.flags[key as usize] = true;
  }

  pub fn clear(&mut self, key: BlockKey) {
    self.flags[key as usize] = false;
  }

  pub fn is_request_blocked(&self, origin: Requester, resource: Resource) -> bool {
    self.get(BlockKey::request(origin, resource))
  }

  pub fn is_response_blocked(&self, tier: Tier, dest: Requester) -> bool {
    self.get(BlockKey::response(tier, dest))
  }

  pub fn origin_blocked(&self, origin: Requester) -> bool {
    Resource::ALL.iter().any(|&r| self.is_request_blocked(origin, r))
  }

  /// Clear every request flag raised against `origin`.
  pub fn clear_origin(&mut self, origin: Requester) {
    for r in Resource::ALL {
      self.clear(BlockKey::request(origin, r));
    }
  }

  pub fn any_request(&self) -> bool {
    BlockKey::ALL.iter().any(|&k| k.is_request() && self.get(k))
  }

  pub fn any_response(&self) -> bool {
    BlockKey::ALL.iter().any(|&k| !k.is_request() && self.get(k))
  }

  pub fn active(&self) -> Vec<BlockKey> {
    BlockKey::ALL.iter().copied().filter(|&k| self.get(k)).collect()
  }
}
