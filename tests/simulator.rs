use std::fs;

use tiermem::mem::{Requester, Tier};
use tiermem::simulator::config::{validate_config, AppConfig};
use tiermem::Simulator;

fn run(config: AppConfig) -> (Simulator, tiermem::simulator::Summary) {
  validate_config(&config).expect("valid config");
  let mut sim = Simulator::new(config).expect("simulator");
  let summary = sim.run().expect("run");
  (sim, summary)
}

fn squeezed() -> AppConfig {
  let mut config = AppConfig::default();
  config.fast_tier.queue_depth = 1;
  config.slow_tier.queue_depth = 1;
  config.access_counter.queue_depth = 1;
  config.traffic.remapping_table.response_depth = 1;
  config.traffic.migration_manager.response_depth = 1;
  config.traffic.remapping_table.drain_latency = 50;
  config.traffic.migration_manager.drain_latency = 50;
  config
}

#[test]
fn default_workload_completes() {
  let (sim, summary) = run(AppConfig::default());

  assert!(summary.finished);
  assert_eq!(summary.sources[Requester::RemappingTable.index()].completed, 256);
  assert_eq!(summary.sources[Requester::MigrationManager.index()].completed, 64);
  assert_eq!(summary.counted, 320);
  assert_eq!(summary.dispatcher.requests_admitted, 320);
  assert_eq!(summary.dispatcher.routed_fast, 128);
  assert_eq!(summary.dispatcher.routed_slow, 192);
  assert_eq!(summary.tiers[Tier::Fast.index()].served, 128);
  assert_eq!(summary.tiers[Tier::Slow.index()].served, 192);
  assert!(sim.peers().counter.max_deliveries() <= 1);
  assert!(sim.dispatcher().blocked().active().is_empty());
}

#[test]
fn shared_page_is_counted_per_requester() {
  let (sim, _) = run(AppConfig::default());
  // 1 MiB is both the remapping table's 129th address and the migration
  // manager's first.
  assert_eq!(sim.peers().counter.count(256), 2);
  assert_eq!(sim.peers().counter.count(0), 1);
}

#[test]
fn heavy_backpressure_still_drains() {
  let (sim, summary) = run(squeezed());

  assert!(summary.finished);
  assert!(summary.dispatcher.requests_blocked > 0);
  assert!(summary.dispatcher.responses_blocked > 0);
  assert!(summary.dispatcher.invites_sent > 0);
  assert_eq!(summary.dispatcher.requests_admitted, 320);
  assert_eq!(summary.counted, 320);
  assert_eq!(sim.peers().counter.max_deliveries(), 1);
  assert!(sim.dispatcher().blocked().active().is_empty());
}

#[test]
fn unmetered_migration_leaves_counter_alone() {
  let mut config = squeezed();
  config.dispatcher.meter_migration_traffic = false;
  let (_, summary) = run(config);

  assert!(summary.finished);
  assert_eq!(summary.counted, 256);
  assert_eq!(summary.dispatcher.requests_metered, 256);
}

#[test]
fn tick_limit_stops_early() {
  let mut config = AppConfig::default();
  config.simulation.max_ticks = 50;
  let (_, summary) = run(config);

  assert!(!summary.finished);
  assert!(summary.ticks <= 50);
}

#[test]
fn untimed_accesses_use_tier_latency() {
  let mut sim = Simulator::new(AppConfig::default()).expect("simulator");
  assert_eq!(sim.atomic_access(0x40), 20);
  assert_eq!(sim.atomic_access(0x20_0000), 80);
  sim.functional_access(0x40);
  assert_eq!(sim.dispatcher().stats().atomic_passes, 2);
  assert_eq!(sim.dispatcher().stats().functional_passes, 1);
  assert_eq!(sim.peers().tiers[Tier::Fast.index()].atomic_accesses(), 1);
  assert_eq!(sim.peers().tiers[Tier::Fast.index()].functional_accesses(), 1);
}

#[test]
fn trace_has_one_line_per_offer() {
  let path = std::env::temp_dir().join(format!("tiermem-trace-{}.jsonl", std::process::id()));
  let mut config = squeezed();
  config.simulation.trace_file = path.to_string_lossy().into_owned();
  let (_, summary) = run(config);

  let text = fs::read_to_string(&path).expect("trace file");
  fs::remove_file(&path).ok();

  let lines: Vec<serde_json::Value> = text
    .lines()
    .map(|l| serde_json::from_str(l).expect("json line"))
    .collect();
  let accepted_on = |link: &str| {
    lines
      .iter()
      .filter(|v| v["link"] == link && v["accepted"] == true)
      .count() as u64
  };

  assert!(lines
    .iter()
    .filter(|v| v["link"] == "fast_side_port")
    .all(|v| v["direction"] == "response"));
  assert_eq!(accepted_on("rt_side_port"), 256);
  assert_eq!(accepted_on("mm_side_port"), 64);
  assert_eq!(accepted_on("fast_side_port") + accepted_on("slow_side_port"), 320);
  let rejected = lines.iter().filter(|v| v["accepted"] == false).count() as u64;
  assert_eq!(
    rejected,
    summary.dispatcher.requests_blocked + summary.dispatcher.responses_blocked
  );
}
