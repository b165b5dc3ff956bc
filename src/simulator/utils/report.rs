use crate::mem::dispatcher::Dispatcher;
use crate::simulator::simulator::Summary;

pub fn print_summary(summary: &Summary) {
  println!("\n--- Simulation Summary ---");
  println!("Finished at tick {} after {} events", summary.ticks, summary.events);

  for source in &summary.sources {
    println!(
      "  {:<18} completed={} rejected={}",
      source.requester.to_string(),
      source.completed,
      source.rejections
    );
  }
  for tier in &summary.tiers {
    println!("  {:<18} served={}", tier.tier.to_string(), tier.served);
  }
  println!("  access_counter     counted={}", summary.counted);

  if !summary.hot_pages.is_empty() {
    println!("\nHot pages:");
    for (page, count) in &summary.hot_pages {
      println!("  page {:#x}: {}", page, count);
    }
  }

  let s = &summary.dispatcher;
  println!("\nDispatcher:");
  println!(
    "  requests  admitted={} blocked={} metered={} metering_skipped={}",
    s.requests_admitted, s.requests_blocked, s.requests_metered, s.metering_skipped
  );
  println!("  routed    fast={} slow={}", s.routed_fast, s.routed_slow);
  println!(
    "  responses forwarded={} blocked={}",
    s.responses_forwarded, s.responses_blocked
  );
  println!(
    "  retries   req={} resp={} invites={}",
    s.req_retries, s.resp_retries, s.invites_sent
  );
  println!("  wakeups   {}", s.wakeups);
  println!("--- End Summary ---\n");
}

pub fn print_dispatcher_records(dispatcher: &Dispatcher) {
  println!("\n--- Dispatcher Records ---");
  let params = dispatcher.params();
  println!(
    "[{}] fast_tier_capacity={:#x} meter_migration_traffic={}",
    dispatcher.name(),
    params.fast_tier_capacity,
    params.meter_migration_traffic
  );
  for record in dispatcher.records() {
    println!("  Tick {}: {} {}", record.tick, record.action, record.subject);
  }
  println!("--- End Records ---\n");
}
