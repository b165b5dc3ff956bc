use log::{debug, info, warn};
use serde::Serialize;
use std::io::Result;
use std::path::Path;

use super::config::AppConfig;
use super::peers::Peers;
use super::sim::shell::{Command, Shell};
use super::sim::{StepMode, TraceWriter};
use crate::mem::dispatcher::{Dispatcher, DispatcherStats, PortId};
use crate::mem::event::{Event, EventHandle, Scheduler};
use crate::mem::packet::{Packet, Requester, Resource, Tick, Tier};

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
  pub requester: Requester,
  pub completed: u64,
  pub rejections: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierSummary {
  pub tier: Tier,
  pub served: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
  pub ticks: Tick,
  pub events: u64,
  pub finished: bool,
  pub sources: Vec<SourceSummary>,
  pub tiers: Vec<TierSummary>,
  pub counted: u64,
  pub hot_pages: Vec<(u64, u64)>,
  pub dispatcher: DispatcherStats,
}

/// Drives the dispatcher and its peers through the event queue.
pub struct Simulator {
  config: AppConfig,
  events: EventHandle,
  dispatcher: Dispatcher,
  peers: Peers,
  trace: Option<TraceWriter>,
  processed: u64,
}

impl Simulator {
  pub fn new(config: AppConfig) -> Result<Self> {
    let events = EventHandle::new();
    let dispatcher = Dispatcher::new("dispatcher", config.dispatcher.clone(), Box::new(events.clone()));
    let mut peers = Peers::new(&config, &events);

    let trace = if config.simulation.trace_file.is_empty() {
      None
    } else {
      Some(TraceWriter::create(Path::new(&config.simulation.trace_file))?)
    };

    for range in dispatcher.address_ranges(&mut peers) {
      info!("{}: serving {}", dispatcher.name(), range);
    }

    let mut scheduler = events.clone();
    for who in Requester::ALL {
      if config.traffic.get(who).requests > 0 {
        scheduler.schedule(0, Event::Issue(who));
      }
    }

    Ok(Self {
      config,
      events,
      dispatcher,
      peers,
      trace,
      processed: 0,
    })
  }

  pub fn dispatcher(&self) -> &Dispatcher {
    &self.dispatcher
  }

  pub fn peers(&self) -> &Peers {
    &self.peers
  }

  pub fn now(&self) -> Tick {
    self.events.now()
  }

  pub fn run(&mut self) -> Result<Summary> {
    match StepMode::from_flag(self.config.simulation.step_mode) {
      StepMode::Continuous => self.run_continuous()?,
      StepMode::Step => self.run_step_mode()?,
    }
    if let Some(trace) = self.trace.as_mut() {
      trace.flush()?;
    }
    Ok(self.summary())
  }

  fn run_step_mode(&mut self) -> Result<()> {
    println!("Step mode - Enter steps one event, 'si N' steps N, 'p' prints status, 'c' continues, 'q' quits");
    let mut shell = Shell::new()?;
    loop {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if !self.step()? {
              println!("Simulation finished at tick {}", self.now());
              return Ok(());
            }
          }
          println!("tick {}: {}", self.now(), self.dispatcher.status());
        },
        Command::Status => println!("tick {}: {}", self.now(), self.dispatcher.status()),
        Command::Continue => return self.run_continuous(),
        Command::Quit => return Ok(()),
      }
    }
  }

  fn run_continuous(&mut self) -> Result<()> {
    while self.step()? {}
    Ok(())
  }

  /// Process the next event. `false` once there is nothing left to do or the
  /// tick limit is reached.
  pub fn step(&mut self) -> Result<bool> {
    let max_ticks = self.config.simulation.max_ticks;
    match self.events.peek_tick() {
      None => return Ok(false),
      Some(tick) if max_ticks > 0 && tick > max_ticks => {
        warn!("stopping at tick limit {}", max_ticks);
        return Ok(false);
      },
      Some(_) => {},
    }
    let Some((tick, event)) = self.events.pop() else {
      return Ok(false);
    };
    self.processed += 1;
    debug!("tick {}: {:?}", tick, event);
    self.handle(event)?;
    Ok(true)
  }

  fn handle(&mut self, event: Event) -> Result<()> {
    match event {
      Event::Wake => self.dispatcher.process_event(),
      Event::Issue(who) => {
        if let Some(pkt) = self.peers.source(who).next_request() {
          self.offer_request(who, pkt)?;
        }
      },
      Event::ResendRequest(who) => {
        if let Some(pkt) = self.peers.source(who).take_pending() {
          self.offer_request(who, pkt)?;
        }
      },
      Event::Drain(who) => {
        if self.peers.source(who).drain() {
          self.dispatcher.recv_resp_retry(who, &mut self.peers);
        }
      },
      Event::Complete(Resource::AccessCounter) => {
        if self.peers.counter.complete() {
          self.dispatcher.recv_req_retry(Resource::AccessCounter, &mut self.peers);
        }
      },
      Event::Complete(Resource::Storage(tier)) => {
        let (response, retry) = self.peers.tier(tier).complete();
        if let Some(pkt) = response {
          self.offer_response(tier, pkt)?;
        }
        if retry {
          self.dispatcher.recv_req_retry(Resource::Storage(tier), &mut self.peers);
        }
      },
      Event::ResendResponse(tier) => {
        if let Some(pkt) = self.peers.tier(tier).take_outbound() {
          self.offer_response(tier, pkt)?;
        }
      },
    }
    Ok(())
  }

  fn offer_request(&mut self, who: Requester, pkt: Packet) -> Result<()> {
    let accepted = self.dispatcher.recv_timing_req(who, pkt, &mut self.peers);
    self.trace(PortId::from(who), &pkt, accepted)?;
    self.peers.source(who).sent(pkt, accepted);
    Ok(())
  }

  fn offer_response(&mut self, tier: Tier, pkt: Packet) -> Result<()> {
    let accepted = self.dispatcher.recv_timing_resp(tier, pkt, &mut self.peers);
    self.trace(PortId::from(tier), &pkt, accepted)?;
    self.peers.tier(tier).responded(pkt, accepted);
    Ok(())
  }

  fn trace(&mut self, link: PortId, pkt: &Packet, accepted: bool) -> Result<()> {
    let tick = self.events.now();
    match self.trace.as_mut() {
      Some(trace) => trace.record(tick, link, pkt, accepted),
      None => Ok(()),
    }
  }

  /// Issue an atomic access through the dispatcher; returns its latency.
  pub fn atomic_access(&mut self, addr: u64) -> Tick {
    let mut pkt = Packet::request(u64::MAX, addr, 64);
    self.dispatcher.recv_atomic(&mut pkt, &mut self.peers)
  }

  pub fn functional_access(&mut self, addr: u64) {
    let mut pkt = Packet::request(u64::MAX, addr, 64);
    self.dispatcher.recv_functional(&mut pkt, &mut self.peers);
  }

  pub fn summary(&self) -> Summary {
    Summary {
      ticks: self.events.now(),
      events: self.processed,
      finished: self.peers.is_done(),
      sources: self
        .peers
        .sources
        .iter()
        .map(|s| SourceSummary {
          requester: s.who(),
          completed: s.completed(),
          rejections: s.rejections(),
        })
        .collect(),
      tiers: self
        .peers
        .tiers
        .iter()
        .map(|t| TierSummary {
          tier: t.tier(),
          served: t.served(),
        })
        .collect(),
      counted: self.peers.counter.counted(),
      hot_pages: self.peers.counter.hot_pages(8),
      dispatcher: self.dispatcher.stats().clone(),
    }
  }
}

