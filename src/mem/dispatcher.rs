//! Dispatcher: routes traffic from the remapping table and the migration
//! manager to the access counter and the two storage tiers, and carries the
//! backpressure handshake on every link.

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::addr_range::{span, AddrRange};
use super::block::{BlockKey, BlockMatrix};
use super::event::{Event, Scheduler};
use super::packet::{Packet, PacketId, Requester, Resource, Tick, Tier};
use super::port::{Fabric, Port, PortRole, RetryOutbox};
use crate::node_record;
use crate::simulator::sim::records::Record;

/// Fast tier capacity (1 MiB): addresses below it live in the fast tier.
pub const FAST_TIER_CAPACITY: u64 = 1 << 20;

/// Ticks between handling a packet and the activity wake-up.
pub const WAKE_DELAY: Tick = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortId {
  RemappingTable,
  MigrationManager,
  AccessCounter,
  FastTier,
  SlowTier,
}

impl PortId {
  pub const ALL: [PortId; 5] = [
    PortId::RemappingTable,
    PortId::MigrationManager,
    PortId::AccessCounter,
    PortId::FastTier,
    PortId::SlowTier,
  ];

  pub fn role(self) -> PortRole {
    match self {
      PortId::RemappingTable | PortId::MigrationManager => PortRole::Upstream,
      PortId::AccessCounter | PortId::FastTier | PortId::SlowTier => PortRole::Downstream,
    }
  }

  fn index(self) -> usize {
    self as usize
  }
}

impl From<Requester> for PortId {
  fn from(r: Requester) -> Self {
    match r {
      Requester::RemappingTable => PortId::RemappingTable,
      Requester::MigrationManager => PortId::MigrationManager,
    }
  }
}

impl From<Tier> for PortId {
  fn from(t: Tier) -> Self {
    match t {
      Tier::Fast => PortId::FastTier,
      Tier::Slow => PortId::SlowTier,
    }
  }
}

impl From<Resource> for PortId {
  fn from(r: Resource) -> Self {
    match r {
      Resource::AccessCounter => PortId::AccessCounter,
      Resource::Storage(t) => t.into(),
    }
  }
}

impl fmt::Display for PortId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PortId::RemappingTable => "rt_side_port",
      PortId::MigrationManager => "mm_side_port",
      PortId::AccessCounter => "ac_side_port",
      PortId::FastTier => "fast_side_port",
      PortId::SlowTier => "slow_side_port",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherParams {
  pub fast_tier_capacity: u64,
  /// Send migration-manager requests through the access counter too.
  pub meter_migration_traffic: bool,
  pub wake_delay: Tick,
}

impl Default for DispatcherParams {
  fn default() -> Self {
    Self {
      fast_tier_capacity: FAST_TIER_CAPACITY,
      meter_migration_traffic: true,
      wake_delay: WAKE_DELAY,
    }
  }
}

/// Tier holding `addr` when the fast tier spans `[0, fast_tier_capacity)`.
pub fn route(addr: u64, fast_tier_capacity: u64) -> Tier {
  if addr < fast_tier_capacity {
    Tier::Fast
  } else {
    Tier::Slow
  }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherStats {
  pub requests_admitted: u64,
  pub requests_blocked: u64,
  pub requests_metered: u64,
  /// Re-driven admissions whose access-counter delivery had already happened.
  pub metering_skipped: u64,
  pub routed_fast: u64,
  pub routed_slow: u64,
  pub responses_forwarded: u64,
  pub responses_blocked: u64,
  pub req_retries: u64,
  pub resp_retries: u64,
  pub invites_sent: u64,
  pub atomic_passes: u64,
  pub functional_passes: u64,
  pub wakeups: u64,
}

pub struct Dispatcher {
  name: String,
  params: DispatcherParams,
  ports: [Port<PortId>; 5],
  blocked: BlockMatrix,
  // Per origin: request already delivered to the access counter but not yet
  // to storage.
  metered: [Option<PacketId>; 2],
  outbox: RetryOutbox<PortId>,
  scheduler: Box<dyn Scheduler>,
  wake_pending: bool,
  stats: DispatcherStats,
  records: Vec<Record>,
}

impl Dispatcher {
  pub fn new(name: impl Into<String>, params: DispatcherParams, scheduler: Box<dyn Scheduler>) -> Self {
    Self {
      name: name.into(),
      params,
      ports: PortId::ALL.map(|id| Port::new(id, id.role())),
      blocked: BlockMatrix::new(),
      metered: [None; 2],
      outbox: RetryOutbox::default(),
      scheduler,
      wake_pending: false,
      stats: DispatcherStats::default(),
      records: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn params(&self) -> &DispatcherParams {
    &self.params
  }

  pub fn stats(&self) -> &DispatcherStats {
    &self.stats
  }

  pub fn records(&self) -> &[Record] {
    &self.records
  }

  pub fn blocked(&self) -> &BlockMatrix {
    &self.blocked
  }

  pub fn port(&self, id: PortId) -> &Port<PortId> {
    &self.ports[id.index()]
  }

  pub fn route(&self, addr: u64) -> Tier {
    route(addr, self.params.fast_tier_capacity)
  }

  pub fn status(&self) -> String {
    let active: Vec<String> = self.blocked.active().iter().map(|k| k.to_string()).collect();
    format!(
      "blocked=[{}], admitted={}, forwarded={}",
      active.join(", "),
      self.stats.requests_admitted,
      self.stats.responses_forwarded
    )
  }

  /// Range advertised upstream: the span of both storage tiers' ranges.
  pub fn address_ranges<F: Fabric<PortId> + ?Sized>(&self, fabric: &mut F) -> Vec<AddrRange> {
    let mut ranges = fabric.peer(PortId::FastTier).address_ranges();
    ranges.extend(fabric.peer(PortId::SlowTier).address_ranges());
    let merged: Vec<AddrRange> = span(&ranges).into_iter().collect();
    debug!("{}: sending new ranges {:?}", self.name, merged);
    merged
  }

  /// A storage link reported new ranges.
  pub fn recv_range_change<F: Fabric<PortId> + ?Sized>(&mut self, fabric: &mut F) {
    info!("{}: storage ranges changed, notifying requesters", self.name);
    for origin in Requester::ALL {
      fabric.peer(origin.into()).range_change();
    }
  }

  pub fn recv_atomic<F: Fabric<PortId> + ?Sized>(&mut self, pkt: &mut Packet, fabric: &mut F) -> Tick {
    let tier = self.route(pkt.addr);
    self.stats.atomic_passes += 1;
    trace!("{}: atomic {:#x} -> {}", self.name, pkt.addr, tier);
    fabric.peer(tier.into()).atomic_transfer(pkt)
  }

  pub fn recv_functional<F: Fabric<PortId> + ?Sized>(&mut self, pkt: &mut Packet, fabric: &mut F) {
    let tier = self.route(pkt.addr);
    self.stats.functional_passes += 1;
    trace!("{}: functional {:#x} -> {}", self.name, pkt.addr, tier);
    fabric.peer(tier.into()).functional_transfer(pkt);
  }

  /// Timing request arriving on the upstream link of `origin`. `false`
  /// means the dispatcher now owes that requester a retry invite.
  pub fn recv_timing_req<F: Fabric<PortId> + ?Sized>(
    &mut self,
    origin: Requester,
    mut pkt: Packet,
    fabric: &mut F,
  ) -> bool {
    let link = PortId::from(origin);
    if self.ports[link.index()].owes_retry() {
      debug!("{}: {} sent before being invited, rejecting {:#x}", self.name, link, pkt.addr);
      return false;
    }
    pkt.stamp_origin(origin);
    let accepted = self.handle_request(pkt, fabric);
    if !accepted {
      self.ports[link.index()].owe_retry();
    }
    self.flush(fabric);
    accepted
  }

  /// Timing response arriving on the downstream link of `tier`.
  pub fn recv_timing_resp<F: Fabric<PortId> + ?Sized>(&mut self, tier: Tier, mut pkt: Packet, fabric: &mut F) -> bool {
    let link = PortId::from(tier);
    if self.ports[link.index()].owes_retry() {
      debug!("{}: {} sent before being invited, rejecting {:#x}", self.name, link, pkt.addr);
      return false;
    }
    pkt.stamp_dest(tier);
    let accepted = self.handle_response(pkt, fabric);
    if !accepted {
      self.ports[link.index()].owe_retry();
    }
    self.flush(fabric);
    accepted
  }

  /// `resource` can take requests again.
  pub fn recv_req_retry<F: Fabric<PortId> + ?Sized>(&mut self, resource: Resource, fabric: &mut F) {
    self.ports[PortId::from(resource).index()].unstall();
    self.stats.req_retries += 1;
    self.handle_req_retry(resource);
    self.flush(fabric);
  }

  /// Requester `dest` can take responses again.
  pub fn recv_resp_retry<F: Fabric<PortId> + ?Sized>(&mut self, dest: Requester, fabric: &mut F) {
    self.ports[PortId::from(dest).index()].unstall();
    self.stats.resp_retries += 1;
    self.handle_resp_retry(dest);
    self.flush(fabric);
  }

  pub fn process_event(&mut self) {
    self.wake_pending = false;
    self.stats.wakeups += 1;
    debug!("{}: event processed at tick {}", self.name, self.scheduler.now());
  }

  fn meters(&self, origin: Requester) -> bool {
    origin == Requester::RemappingTable || self.params.meter_migration_traffic
  }

  fn is_blocked(&self, origin: Requester, resource: Resource) -> bool {
    self.blocked.is_request_blocked(origin, resource) || self.ports[PortId::from(resource).index()].is_stalled()
  }

  fn handle_request<F: Fabric<PortId> + ?Sized>(&mut self, pkt: Packet, fabric: &mut F) -> bool {
    let Some(origin) = pkt.origin else {
      panic!("protocol violation: {} got request {} without an origin tag", self.name, pkt.id);
    };
    let tier = self.route(pkt.addr);
    let storage = Resource::Storage(tier);
    self.schedule_wake();

    let slot = origin.index();
    if let Some(id) = self.metered[slot] {
      if id != pkt.id {
        warn!(
          "{}: {} resent {} instead of {}, dropping its metering credit",
          self.name, origin, pkt.id, id
        );
        self.metered[slot] = None;
      }
    }
    let already_metered = self.metered[slot].is_some();
    let meter = self.meters(origin) && !already_metered;

    // Nothing goes out unless every resource of this admission is open.
    if meter && self.is_blocked(origin, Resource::AccessCounter) {
      self.block_request(origin, Resource::AccessCounter, &pkt);
      return false;
    }
    if self.is_blocked(origin, storage) {
      self.block_request(origin, storage, &pkt);
      return false;
    }

    if meter {
      if !self.ports[PortId::AccessCounter.index()].send(fabric.peer(PortId::AccessCounter), pkt) {
        self.block_request(origin, Resource::AccessCounter, &pkt);
        return false;
      }
      self.metered[slot] = Some(pkt.id);
      self.stats.requests_metered += 1;
    } else if already_metered {
      self.stats.metering_skipped += 1;
    }

    let link = PortId::from(tier);
    if !self.ports[link.index()].send(fabric.peer(link), pkt) {
      self.block_request(origin, storage, &pkt);
      return false;
    }

    self.metered[slot] = None;
    self.stats.requests_admitted += 1;
    match tier {
      Tier::Fast => self.stats.routed_fast += 1,
      Tier::Slow => self.stats.routed_slow += 1,
    }
    trace!("{}: {} request {:#x} -> {}", self.name, origin, pkt.addr, tier);
    true
  }

  fn block_request(&mut self, origin: Requester, resource: Resource, pkt: &Packet) {
    let key = BlockKey::request(origin, resource);
    debug!("{}: {} is busy! request blocked for addr {:#x}", self.name, resource, pkt.addr);
    self.blocked.set(key);
    self.stats.requests_blocked += 1;
    node_record!(self, self.scheduler.now(), "block", format!("{} addr={:#x}", key, pkt.addr));
  }

  fn handle_response<F: Fabric<PortId> + ?Sized>(&mut self, pkt: Packet, fabric: &mut F) -> bool {
    let (Some(dest), Some(tier)) = (pkt.origin, pkt.dest) else {
      panic!("protocol violation: {} got response {} without routing tags", self.name, pkt.id);
    };
    self.schedule_wake();

    let key = BlockKey::response(tier, dest);
    let link = PortId::from(dest);
    if self.blocked.get(key) || self.ports[link.index()].is_stalled() || !self.ports[link.index()].send(fabric.peer(link), pkt) {
      debug!("{}: {} is busy! response blocked for addr {:#x}", self.name, dest, pkt.addr);
      self.blocked.set(key);
      self.stats.responses_blocked += 1;
      node_record!(self, self.scheduler.now(), "block", format!("{} addr={:#x}", key, pkt.addr));
      return false;
    }

    self.stats.responses_forwarded += 1;
    trace!("{}: {} response {:#x} -> {}", self.name, tier, pkt.addr, dest);
    true
  }

  fn handle_req_retry(&mut self, resource: Resource) {
    assert!(
      self.blocked.any_request(),
      "protocol violation: {} got a request retry from {} with no request blocked",
      self.name,
      resource
    );

    // Origins are released independently. One still held by another stalled
    // resource fails the pre-check again on its resend.
    for origin in Requester::ALL {
      if !self.blocked.origin_blocked(origin) {
        continue;
      }
      self.blocked.clear_origin(origin);
      if self.outbox.invite(&mut self.ports[PortId::from(origin).index()]) {
        self.stats.invites_sent += 1;
      }
      node_record!(self, self.scheduler.now(), "unblock", format!("{} by {}", origin, resource));
    }
  }

  fn handle_resp_retry(&mut self, dest: Requester) {
    assert!(
      self.blocked.any_response(),
      "protocol violation: {} got a response retry from {} with no response blocked",
      self.name,
      dest
    );

    let mut woken = false;
    for tier in Tier::ALL {
      let key = BlockKey::response(tier, dest);
      if !self.blocked.get(key) {
        continue;
      }
      woken = true;
      self.blocked.clear(key);
      if self.outbox.invite(&mut self.ports[PortId::from(tier).index()]) {
        self.stats.invites_sent += 1;
      }
      node_record!(self, self.scheduler.now(), "unblock", format!("{} by {}", tier, dest));
    }
    assert!(
      woken,
      "protocol violation: {} got a response retry from {} which blocked no tier",
      self.name, dest
    );
  }

  fn schedule_wake(&mut self) {
    if !self.wake_pending {
      self.wake_pending = true;
      self.scheduler.schedule(self.params.wake_delay, Event::Wake);
    }
  }

  fn flush<F: Fabric<PortId> + ?Sized>(&mut self, fabric: &mut F) {
    self.outbox.flush(fabric);
  }
}
