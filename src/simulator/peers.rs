//! Peers the simulator binds to the dispatcher's links: two traffic sources,
//! a page-granular access counter and two bounded-queue storage tiers.

use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};

use crate::mem::addr_range::AddrRange;
use crate::mem::dispatcher::PortId;
use crate::mem::event::{Event, EventHandle, Scheduler};
use crate::mem::packet::{Packet, PacketId, Requester, Resource, Tick, Tier};
use crate::mem::port::{Fabric, Peer};

use super::config::{AppConfig, CounterSection, TierSection, TrafficSection};

/// Issues a strided request stream and sinks the responses.
pub struct TrafficSource {
  who: Requester,
  cfg: TrafficSection,
  events: EventHandle,
  issued: u64,
  pending: Option<Packet>,
  inbox: VecDeque<Packet>,
  owes_retry: bool,
  completed: u64,
  rejections: u64,
}

impl TrafficSource {
  pub fn new(who: Requester, cfg: TrafficSection, events: EventHandle) -> Self {
    Self {
      who,
      cfg,
      events,
      issued: 0,
      pending: None,
      inbox: VecDeque::new(),
      owes_retry: false,
      completed: 0,
      rejections: 0,
    }
  }

  pub fn who(&self) -> Requester {
    self.who
  }

  pub fn completed(&self) -> u64 {
    self.completed
  }

  pub fn rejections(&self) -> u64 {
    self.rejections
  }

  /// Everything issued and answered.
  pub fn is_done(&self) -> bool {
    self.completed == self.cfg.requests && self.pending.is_none()
  }

  /// Packet to offer on an `Issue` event, unless we still wait for an invite.
  pub fn next_request(&mut self) -> Option<Packet> {
    if self.pending.is_some() || self.issued == self.cfg.requests {
      return None;
    }
    let id = packet_id(self.who, self.issued);
    let addr = self.cfg.base.wrapping_add(self.issued.wrapping_mul(self.cfg.stride));
    self.issued += 1;
    Some(Packet::request(id, addr, self.cfg.size))
  }

  /// Packet to offer again on a `ResendRequest` event.
  pub fn take_pending(&mut self) -> Option<Packet> {
    self.pending.take()
  }

  pub fn sent(&mut self, pkt: Packet, accepted: bool) {
    if accepted {
      if self.issued < self.cfg.requests {
        self.events.schedule(self.cfg.interval, Event::Issue(self.who));
      }
    } else {
      self.rejections += 1;
      self.pending = Some(pkt);
    }
  }

  /// Consume one response. Returns whether the dispatcher is now owed a
  /// response retry.
  pub fn drain(&mut self) -> bool {
    if self.inbox.pop_front().is_some() {
      self.completed += 1;
    }
    if !self.inbox.is_empty() {
      self.events.schedule(self.cfg.drain_latency, Event::Drain(self.who));
    }
    std::mem::take(&mut self.owes_retry)
  }
}

/// Requester in the top 16 bits, sequence number below.
fn packet_id(who: Requester, seq: u64) -> PacketId {
  ((who.index() as u64) << 48) | seq
}

impl Peer for TrafficSource {
  fn try_send(&mut self, pkt: Packet) -> bool {
    if self.inbox.len() >= self.cfg.response_depth {
      self.owes_retry = true;
      return false;
    }
    self.inbox.push_back(pkt);
    if self.inbox.len() == 1 {
      self.events.schedule(self.cfg.drain_latency, Event::Drain(self.who));
    }
    true
  }

  fn retry_invite(&mut self) {
    self.events.schedule(0, Event::ResendRequest(self.who));
  }

  fn range_change(&mut self) {
    info!("{}: address ranges changed", self.who);
  }
}

/// Counts accesses per page. Consumes requests, never answers them.
pub struct AccessCounter {
  cfg: CounterSection,
  events: EventHandle,
  queue: VecDeque<Packet>,
  owes_retry: bool,
  counts: HashMap<u64, u64>,
  counted: u64,
  seen: HashMap<PacketId, u64>,
}

impl AccessCounter {
  pub fn new(cfg: CounterSection, events: EventHandle) -> Self {
    Self {
      cfg,
      events,
      queue: VecDeque::new(),
      owes_retry: false,
      counts: HashMap::new(),
      counted: 0,
      seen: HashMap::new(),
    }
  }

  pub fn counted(&self) -> u64 {
    self.counted
  }

  /// Largest number of times any single packet id was delivered.
  pub fn max_deliveries(&self) -> u64 {
    self.seen.values().copied().max().unwrap_or(0)
  }

  pub fn count(&self, page: u64) -> u64 {
    self.counts.get(&page).copied().unwrap_or(0)
  }

  /// The `n` most accessed pages, hottest first.
  pub fn hot_pages(&self, n: usize) -> Vec<(u64, u64)> {
    let mut pages: Vec<(u64, u64)> = self.counts.iter().map(|(&p, &c)| (p, c)).collect();
    pages.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    pages.truncate(n);
    pages
  }

  /// Finish the oldest access. Returns whether a request retry is owed.
  pub fn complete(&mut self) -> bool {
    if let Some(pkt) = self.queue.pop_front() {
      *self.counts.entry(pkt.addr >> self.cfg.page_shift).or_insert(0) += 1;
      self.counted += 1;
    }
    if !self.queue.is_empty() {
      self.events.schedule(self.cfg.latency, Event::Complete(Resource::AccessCounter));
    }
    std::mem::take(&mut self.owes_retry)
  }
}

impl Peer for AccessCounter {
  fn try_send(&mut self, pkt: Packet) -> bool {
    if self.queue.len() >= self.cfg.queue_depth {
      self.owes_retry = true;
      return false;
    }
    *self.seen.entry(pkt.id).or_insert(0) += 1;
    self.queue.push_back(pkt);
    if self.queue.len() == 1 {
      self.events.schedule(self.cfg.latency, Event::Complete(Resource::AccessCounter));
    }
    true
  }

  fn retry_invite(&mut self) {
    warn!("access counter never sends responses, ignoring retry invite");
  }
}

/// Bounded request queue with a fixed service latency.
pub struct StorageTier {
  tier: Tier,
  cfg: TierSection,
  events: EventHandle,
  queue: VecDeque<Packet>,
  outbound: Option<Packet>,
  owes_retry: bool,
  served: u64,
  atomic: u64,
  functional: u64,
}

impl StorageTier {
  pub fn new(tier: Tier, cfg: TierSection, events: EventHandle) -> Self {
    Self {
      tier,
      cfg,
      events,
      queue: VecDeque::new(),
      outbound: None,
      owes_retry: false,
      served: 0,
      atomic: 0,
      functional: 0,
    }
  }

  pub fn tier(&self) -> Tier {
    self.tier
  }

  pub fn served(&self) -> u64 {
    self.served
  }

  pub fn atomic_accesses(&self) -> u64 {
    self.atomic
  }

  pub fn functional_accesses(&self) -> u64 {
    self.functional
  }

  pub fn range(&self) -> AddrRange {
    AddrRange::new(self.cfg.start, self.cfg.end)
  }

  /// Finish the oldest request. Yields its response, and whether a request
  /// retry is owed now that a slot freed up.
  pub fn complete(&mut self) -> (Option<Packet>, bool) {
    let retry = std::mem::take(&mut self.owes_retry);
    let Some(mut pkt) = self.queue.pop_front() else {
      return (None, retry);
    };
    if !self.range().contains(pkt.addr) {
      warn!("{}: serviced {:#x} outside {}", self.tier, pkt.addr, self.range());
    }
    pkt.make_response();
    self.served += 1;
    (Some(pkt), retry)
  }

  /// Record how the dispatcher took a response.
  pub fn responded(&mut self, pkt: Packet, accepted: bool) {
    if accepted {
      self.schedule_next();
    } else {
      debug!("{}: response {:#x} rejected, holding it", self.tier, pkt.addr);
      self.outbound = Some(pkt);
    }
  }

  pub fn take_outbound(&mut self) -> Option<Packet> {
    self.outbound.take()
  }

  fn schedule_next(&mut self) {
    if !self.queue.is_empty() {
      self.events.schedule(self.cfg.latency, Event::Complete(self.tier.into()));
    }
  }
}

impl Peer for StorageTier {
  fn try_send(&mut self, pkt: Packet) -> bool {
    if self.queue.len() >= self.cfg.queue_depth {
      self.owes_retry = true;
      return false;
    }
    self.queue.push_back(pkt);
    if self.queue.len() == 1 && self.outbound.is_none() {
      self.events.schedule(self.cfg.latency, Event::Complete(self.tier.into()));
    }
    true
  }

  fn retry_invite(&mut self) {
    self.events.schedule(0, Event::ResendResponse(self.tier));
  }

  fn address_ranges(&self) -> Vec<AddrRange> {
    vec![self.range()]
  }

  fn atomic_transfer(&mut self, _pkt: &mut Packet) -> Tick {
    self.atomic += 1;
    self.cfg.latency
  }

  fn functional_transfer(&mut self, _pkt: &mut Packet) {
    self.functional += 1;
  }
}

/// Everything bound to the dispatcher's links.
pub struct Peers {
  pub sources: [TrafficSource; 2],
  pub counter: AccessCounter,
  pub tiers: [StorageTier; 2],
}

impl Peers {
  pub fn new(config: &AppConfig, events: &EventHandle) -> Self {
    Self {
      sources: Requester::ALL.map(|who| TrafficSource::new(who, config.traffic.get(who).clone(), events.clone())),
      counter: AccessCounter::new(config.access_counter.clone(), events.clone()),
      tiers: Tier::ALL.map(|tier| StorageTier::new(tier, config.tier(tier).clone(), events.clone())),
    }
  }

  pub fn source(&mut self, who: Requester) -> &mut TrafficSource {
    &mut self.sources[who.index()]
  }

  pub fn tier(&mut self, tier: Tier) -> &mut StorageTier {
    &mut self.tiers[tier.index()]
  }

  pub fn is_done(&self) -> bool {
    self.sources.iter().all(|s| s.is_done())
  }
}

impl Fabric<PortId> for Peers {
  fn peer(&mut self, port: PortId) -> &mut dyn Peer {
    match port {
      PortId::RemappingTable => &mut self.sources[0],
      PortId::MigrationManager => &mut self.sources[1],
      PortId::AccessCounter => &mut self.counter,
      PortId::FastTier => &mut self.tiers[0],
      PortId::SlowTier => &mut self.tiers[1],
    }
  }
}
