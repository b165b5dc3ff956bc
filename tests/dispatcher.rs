use tiermem::mem::{
  AddrRange, BlockKey, Dispatcher, DispatcherParams, Event, EventHandle, Fabric, Packet, Peer, PortId, Requester,
  Resource, Tick, Tier,
};

const RT: Requester = Requester::RemappingTable;
const MM: Requester = Requester::MigrationManager;

/// Peer that accepts while `open` and remembers everything it saw.
struct Script {
  open: bool,
  received: Vec<Packet>,
  rejected: usize,
  invites: usize,
  ranges: Vec<AddrRange>,
  latency: Tick,
  functional: usize,
  range_changes: usize,
}

impl Script {
  fn new() -> Self {
    Self {
      open: true,
      received: Vec::new(),
      rejected: 0,
      invites: 0,
      ranges: Vec::new(),
      latency: 0,
      functional: 0,
      range_changes: 0,
    }
  }
}

impl Peer for Script {
  fn try_send(&mut self, pkt: Packet) -> bool {
    if self.open {
      self.received.push(pkt);
    } else {
      self.rejected += 1;
    }
    self.open
  }

  fn retry_invite(&mut self) {
    self.invites += 1;
  }

  fn address_ranges(&self) -> Vec<AddrRange> {
    self.ranges.clone()
  }

  fn range_change(&mut self) {
    self.range_changes += 1;
  }

  fn atomic_transfer(&mut self, _pkt: &mut Packet) -> Tick {
    self.latency
  }

  fn functional_transfer(&mut self, _pkt: &mut Packet) {
    self.functional += 1;
  }
}

struct Bench {
  peers: [Script; 5],
}

impl Bench {
  fn new() -> Self {
    Self {
      peers: [Script::new(), Script::new(), Script::new(), Script::new(), Script::new()],
    }
  }

  fn at(&mut self, port: PortId) -> &mut Script {
    &mut self.peers[port as usize]
  }
}

impl Fabric<PortId> for Bench {
  fn peer(&mut self, port: PortId) -> &mut dyn Peer {
    self.at(port)
  }
}

fn dispatcher_with(params: DispatcherParams) -> (Dispatcher, EventHandle) {
  let events = EventHandle::new();
  let disp = Dispatcher::new("dispatcher", params, Box::new(events.clone()));
  (disp, events)
}

fn dispatcher() -> (Dispatcher, EventHandle) {
  dispatcher_with(DispatcherParams::default())
}

const FAST_ADDR: u64 = 0;
const SLOW_ADDR: u64 = 2_000_000;

#[test]
fn admits_fast_request_when_everything_accepts() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();

  assert!(disp.recv_timing_req(RT, Packet::request(1, FAST_ADDR, 64), &mut bench));
  assert!(disp.blocked().active().is_empty());
  assert_eq!(bench.at(PortId::AccessCounter).received.len(), 1);
  assert_eq!(bench.at(PortId::FastTier).received.len(), 1);
  assert!(bench.at(PortId::SlowTier).received.is_empty());
  assert_eq!(bench.at(PortId::FastTier).received[0].origin, Some(RT));
  assert_eq!(disp.stats().routed_fast, 1);
}

#[test]
fn slow_tier_rejection_blocks_only_that_pair() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::SlowTier).open = false;

  assert!(!disp.recv_timing_req(MM, Packet::request(7, SLOW_ADDR, 64), &mut bench));
  assert!(disp.blocked().get(BlockKey::MmToSlow));
  assert!(!disp.blocked().get(BlockKey::MmToAc));
  assert_eq!(bench.at(PortId::AccessCounter).received.len(), 1);
  assert!(disp.port(PortId::MigrationManager).owes_retry());
  assert!(disp.port(PortId::SlowTier).is_stalled());
}

#[test]
fn retried_request_is_not_counted_twice() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::SlowTier).open = false;
  let pkt = Packet::request(7, SLOW_ADDR, 64);

  assert!(!disp.recv_timing_req(MM, pkt, &mut bench));

  bench.at(PortId::SlowTier).open = true;
  disp.recv_req_retry(Resource::Storage(Tier::Slow), &mut bench);
  assert_eq!(bench.at(PortId::MigrationManager).invites, 1);

  assert!(disp.recv_timing_req(MM, pkt, &mut bench));
  assert_eq!(bench.at(PortId::AccessCounter).received.len(), 1);
  assert_eq!(bench.at(PortId::SlowTier).received.len(), 1);
  assert_eq!(disp.stats().metering_skipped, 1);
  assert_eq!(disp.stats().requests_metered, 1);
}

#[test]
fn access_counter_rejection_holds_back_storage() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::AccessCounter).open = false;
  let pkt = Packet::request(3, FAST_ADDR, 64);

  assert!(!disp.recv_timing_req(RT, pkt, &mut bench));
  assert!(disp.blocked().get(BlockKey::RtToAc));
  assert!(bench.at(PortId::FastTier).received.is_empty());

  bench.at(PortId::AccessCounter).open = true;
  disp.recv_req_retry(Resource::AccessCounter, &mut bench);
  assert!(disp.recv_timing_req(RT, pkt, &mut bench));
  assert_eq!(bench.at(PortId::AccessCounter).received.len(), 1);
  assert_eq!(bench.at(PortId::FastTier).received.len(), 1);
}

#[test]
fn blocked_origin_does_not_stall_the_other() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::SlowTier).open = false;

  assert!(!disp.recv_timing_req(RT, Packet::request(1, SLOW_ADDR, 64), &mut bench));
  assert!(disp.recv_timing_req(MM, Packet::request(2, FAST_ADDR, 64), &mut bench));
  assert_eq!(bench.at(PortId::FastTier).received.len(), 1);
  assert!(disp.blocked().get(BlockKey::RtToSlow));
  assert!(!disp.blocked().origin_blocked(MM));
}

#[test]
fn stalled_resource_gets_no_new_traffic() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::FastTier).open = false;

  assert!(!disp.recv_timing_req(RT, Packet::request(1, FAST_ADDR, 64), &mut bench));
  assert!(!disp.recv_timing_req(MM, Packet::request(2, 0x40, 64), &mut bench));

  // Only the first attempt reached the tier; the second failed the pre-check
  // before the access counter saw it.
  assert_eq!(bench.at(PortId::FastTier).rejected, 1);
  assert_eq!(bench.at(PortId::AccessCounter).received.len(), 1);
  assert!(disp.blocked().get(BlockKey::MmToFast));
}

#[test]
fn request_retry_releases_every_blocked_origin() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::FastTier).open = false;
  bench.at(PortId::SlowTier).open = false;

  assert!(!disp.recv_timing_req(RT, Packet::request(1, FAST_ADDR, 64), &mut bench));
  assert!(!disp.recv_timing_req(MM, Packet::request(2, SLOW_ADDR, 64), &mut bench));

  disp.recv_req_retry(Resource::Storage(Tier::Fast), &mut bench);

  assert!(!disp.blocked().origin_blocked(RT));
  assert!(!disp.blocked().origin_blocked(MM));
  assert_eq!(bench.at(PortId::RemappingTable).invites, 1);
  assert_eq!(bench.at(PortId::MigrationManager).invites, 1);
  assert!(!disp.port(PortId::MigrationManager).owes_retry());
}

#[test]
fn released_origin_reblocks_on_a_still_stalled_resource() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::FastTier).open = false;
  bench.at(PortId::SlowTier).open = false;
  let pkt = Packet::request(2, SLOW_ADDR, 64);

  assert!(!disp.recv_timing_req(RT, Packet::request(1, FAST_ADDR, 64), &mut bench));
  assert!(!disp.recv_timing_req(MM, pkt, &mut bench));
  disp.recv_req_retry(Resource::Storage(Tier::Fast), &mut bench);

  // Slow tier never retried, so the resend stops at the pre-check.
  assert!(!disp.recv_timing_req(MM, pkt, &mut bench));
  assert!(disp.blocked().get(BlockKey::MmToSlow));
  assert_eq!(bench.at(PortId::SlowTier).rejected, 1);
  assert_eq!(bench.at(PortId::AccessCounter).received.len(), 2);

  bench.at(PortId::SlowTier).open = true;
  disp.recv_req_retry(Resource::Storage(Tier::Slow), &mut bench);
  assert_eq!(bench.at(PortId::MigrationManager).invites, 2);
  assert!(disp.recv_timing_req(MM, pkt, &mut bench));
}

#[test]
fn counter_retry_releases_origin_blocked_on_storage() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::FastTier).open = false;

  assert!(!disp.recv_timing_req(RT, Packet::request(1, FAST_ADDR, 64), &mut bench));
  bench.at(PortId::AccessCounter).open = false;
  assert!(!disp.recv_timing_req(MM, Packet::request(2, SLOW_ADDR, 64), &mut bench));
  assert_eq!(disp.blocked().active(), vec![BlockKey::MmToAc, BlockKey::RtToFast]);

  bench.at(PortId::AccessCounter).open = true;
  disp.recv_req_retry(Resource::AccessCounter, &mut bench);

  assert!(disp.blocked().active().is_empty());
  assert_eq!(bench.at(PortId::RemappingTable).invites, 1);
  assert_eq!(bench.at(PortId::MigrationManager).invites, 1);
  assert!(disp.port(PortId::FastTier).is_stalled());
}

#[test]
fn one_retry_wakes_every_origin_it_blocked() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::SlowTier).open = false;

  assert!(!disp.recv_timing_req(RT, Packet::request(1, SLOW_ADDR, 64), &mut bench));
  assert!(!disp.recv_timing_req(MM, Packet::request(2, SLOW_ADDR + 64, 64), &mut bench));

  bench.at(PortId::SlowTier).open = true;
  disp.recv_req_retry(Resource::Storage(Tier::Slow), &mut bench);

  assert!(disp.blocked().active().is_empty());
  assert_eq!(bench.at(PortId::RemappingTable).invites, 1);
  assert_eq!(bench.at(PortId::MigrationManager).invites, 1);
  assert_eq!(disp.stats().invites_sent, 2);
}

#[test]
fn requester_that_owes_a_retry_is_refused_without_new_flags() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::FastTier).open = false;

  assert!(!disp.recv_timing_req(RT, Packet::request(1, FAST_ADDR, 64), &mut bench));
  assert!(!disp.recv_timing_req(RT, Packet::request(2, SLOW_ADDR, 64), &mut bench));

  assert!(bench.at(PortId::SlowTier).received.is_empty());
  assert_eq!(disp.blocked().active(), vec![BlockKey::RtToFast]);
}

#[test]
fn response_reaches_its_origin() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  let mut pkt = Packet::request(9, SLOW_ADDR, 64);
  pkt.stamp_origin(MM);
  pkt.make_response();

  assert!(disp.recv_timing_resp(Tier::Slow, pkt, &mut bench));
  let got = bench.at(PortId::MigrationManager).received[0];
  assert!(got.is_response());
  assert_eq!(got.dest, Some(Tier::Slow));
  assert!(bench.at(PortId::RemappingTable).received.is_empty());
}

#[test]
fn response_backpressure_round_trip() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::RemappingTable).open = false;
  let mut pkt = Packet::request(4, FAST_ADDR, 64);
  pkt.stamp_origin(RT);
  pkt.make_response();

  assert!(!disp.recv_timing_resp(Tier::Fast, pkt, &mut bench));
  assert!(disp.blocked().get(BlockKey::FastToRt));
  assert!(disp.port(PortId::FastTier).owes_retry());

  bench.at(PortId::RemappingTable).open = true;
  disp.recv_resp_retry(RT, &mut bench);
  assert!(!disp.blocked().any_response());
  assert_eq!(bench.at(PortId::FastTier).invites, 1);
  assert_eq!(bench.at(PortId::SlowTier).invites, 0);

  assert!(disp.recv_timing_resp(Tier::Fast, pkt, &mut bench));
  assert_eq!(disp.stats().responses_forwarded, 1);
}

#[test]
fn stalled_destination_blocks_the_other_tier_too() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::RemappingTable).open = false;

  let mut first = Packet::request(1, FAST_ADDR, 64);
  first.stamp_origin(RT);
  first.make_response();
  let mut second = Packet::request(2, SLOW_ADDR, 64);
  second.stamp_origin(RT);
  second.make_response();

  assert!(!disp.recv_timing_resp(Tier::Fast, first, &mut bench));
  assert!(!disp.recv_timing_resp(Tier::Slow, second, &mut bench));
  assert_eq!(bench.at(PortId::RemappingTable).rejected, 1);

  disp.recv_resp_retry(RT, &mut bench);
  assert_eq!(bench.at(PortId::FastTier).invites, 1);
  assert_eq!(bench.at(PortId::SlowTier).invites, 1);
}

#[test]
#[should_panic(expected = "protocol violation")]
fn response_retry_with_nothing_blocked_aborts() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  disp.recv_resp_retry(RT, &mut bench);
}

#[test]
#[should_panic(expected = "protocol violation")]
fn request_retry_with_nothing_blocked_aborts() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  disp.recv_req_retry(Resource::AccessCounter, &mut bench);
}

#[test]
#[should_panic(expected = "without routing tags")]
fn response_without_origin_aborts() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  let mut pkt = Packet::request(1, FAST_ADDR, 64);
  pkt.make_response();
  disp.recv_timing_resp(Tier::Fast, pkt, &mut bench);
}

#[test]
fn migration_traffic_can_skip_metering() {
  let params = DispatcherParams {
    meter_migration_traffic: false,
    ..DispatcherParams::default()
  };
  let (mut disp, _events) = dispatcher_with(params);
  let mut bench = Bench::new();
  bench.at(PortId::AccessCounter).open = false;

  assert!(disp.recv_timing_req(MM, Packet::request(1, SLOW_ADDR, 64), &mut bench));
  assert_eq!(bench.at(PortId::AccessCounter).rejected, 0);
  assert!(!disp.recv_timing_req(RT, Packet::request(2, SLOW_ADDR, 64), &mut bench));
  assert!(disp.blocked().get(BlockKey::RtToAc));
}

#[test]
fn routing_follows_configured_capacity() {
  let params = DispatcherParams {
    fast_tier_capacity: 4096,
    ..DispatcherParams::default()
  };
  let (disp, _events) = dispatcher_with(params);
  assert_eq!(disp.params().fast_tier_capacity, 4096);
  assert_eq!(disp.route(4095), Tier::Fast);
  assert_eq!(disp.route(4096), Tier::Slow);
}

#[test]
fn advertises_span_of_both_tiers() {
  let (disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::FastTier).ranges = vec![AddrRange::new(0, 1 << 20)];
  bench.at(PortId::SlowTier).ranges = vec![AddrRange::new(1 << 20, 16 << 20)];

  assert_eq!(disp.address_ranges(&mut bench), vec![AddrRange::new(0, 16 << 20)]);
}

#[test]
fn range_change_reaches_both_requesters() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  disp.recv_range_change(&mut bench);
  assert_eq!(bench.at(PortId::RemappingTable).range_changes, 1);
  assert_eq!(bench.at(PortId::MigrationManager).range_changes, 1);
}

#[test]
fn atomic_and_functional_bypass_backpressure() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::SlowTier).open = false;
  bench.at(PortId::SlowTier).latency = 80;
  bench.at(PortId::FastTier).latency = 20;
  assert!(!disp.recv_timing_req(RT, Packet::request(1, SLOW_ADDR, 64), &mut bench));

  let mut pkt = Packet::request(2, SLOW_ADDR, 64);
  assert_eq!(disp.recv_atomic(&mut pkt, &mut bench), 80);
  let mut pkt = Packet::request(3, FAST_ADDR, 64);
  assert_eq!(disp.recv_atomic(&mut pkt, &mut bench), 20);
  disp.recv_functional(&mut pkt, &mut bench);

  assert_eq!(bench.at(PortId::FastTier).functional, 1);
  assert_eq!(disp.stats().atomic_passes, 2);
  assert!(disp.blocked().get(BlockKey::RtToSlow));
}

#[test]
fn handled_packets_schedule_one_wake() {
  let (mut disp, events) = dispatcher();
  let mut bench = Bench::new();

  assert!(disp.recv_timing_req(RT, Packet::request(1, FAST_ADDR, 64), &mut bench));
  assert!(disp.recv_timing_req(MM, Packet::request(2, SLOW_ADDR, 64), &mut bench));
  assert_eq!(events.len(), 1);
  assert_eq!(events.pop(), Some((100, Event::Wake)));

  disp.process_event();
  assert_eq!(disp.stats().wakeups, 1);
  assert!(disp.recv_timing_req(RT, Packet::request(3, FAST_ADDR, 64), &mut bench));
  assert_eq!(events.peek_tick(), Some(200));
}

#[test]
fn records_block_and_unblock() {
  let (mut disp, _events) = dispatcher();
  let mut bench = Bench::new();
  bench.at(PortId::FastTier).open = false;
  assert!(!disp.recv_timing_req(RT, Packet::request(1, FAST_ADDR, 64), &mut bench));
  disp.recv_req_retry(Resource::Storage(Tier::Fast), &mut bench);

  let actions: Vec<&str> = disp.records().iter().map(|r| r.action.as_str()).collect();
  assert_eq!(actions, vec!["block", "unblock"]);
  assert!(disp.records()[0].subject.contains("remapping_table->fast_tier"));
}
