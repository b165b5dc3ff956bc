//! FlatMemory: one requester, one resource, same retry handshake as the
//! dispatcher.

use log::{debug, trace};
use serde::Serialize;
use std::fmt;

use super::addr_range::AddrRange;
use super::packet::{Packet, Tick};
use super::port::{Fabric, Port, PortRole, RetryOutbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlatPort {
  BusSide,
  MemSide,
}

impl fmt::Display for FlatPort {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FlatPort::BusSide => f.write_str("bus_side_port"),
      FlatPort::MemSide => f.write_str("mem_side_port"),
    }
  }
}

pub struct FlatMemory {
  name: String,
  bus_side: Port<FlatPort>,
  mem_side: Port<FlatPort>,
  upstream_blocked: bool,
  downstream_blocked: bool,
  outbox: RetryOutbox<FlatPort>,
}

impl FlatMemory {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      bus_side: Port::new(FlatPort::BusSide, PortRole::Upstream),
      mem_side: Port::new(FlatPort::MemSide, PortRole::Downstream),
      upstream_blocked: false,
      downstream_blocked: false,
      outbox: RetryOutbox::default(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn upstream_blocked(&self) -> bool {
    self.upstream_blocked
  }

  pub fn downstream_blocked(&self) -> bool {
    self.downstream_blocked
  }

  pub fn port(&self, id: FlatPort) -> &Port<FlatPort> {
    match id {
      FlatPort::BusSide => &self.bus_side,
      FlatPort::MemSide => &self.mem_side,
    }
  }

  /// Just use the same ranges as whatever is on the memory side.
  pub fn address_ranges<F: Fabric<FlatPort> + ?Sized>(&self, fabric: &mut F) -> Vec<AddrRange> {
    debug!("{}: sending new ranges", self.name);
    fabric.peer(FlatPort::MemSide).address_ranges()
  }

  pub fn recv_range_change<F: Fabric<FlatPort> + ?Sized>(&mut self, fabric: &mut F) {
    fabric.peer(FlatPort::BusSide).range_change();
  }

  pub fn recv_atomic<F: Fabric<FlatPort> + ?Sized>(&mut self, pkt: &mut Packet, fabric: &mut F) -> Tick {
    fabric.peer(FlatPort::MemSide).atomic_transfer(pkt)
  }

  pub fn recv_functional<F: Fabric<FlatPort> + ?Sized>(&mut self, pkt: &mut Packet, fabric: &mut F) {
    fabric.peer(FlatPort::MemSide).functional_transfer(pkt);
  }

  pub fn recv_timing_req<F: Fabric<FlatPort> + ?Sized>(&mut self, pkt: Packet, fabric: &mut F) -> bool {
    if self.bus_side.owes_retry() {
      return false;
    }
    let accepted = self.handle_request(pkt, fabric);
    if !accepted {
      self.bus_side.owe_retry();
    }
    self.outbox.flush(fabric);
    accepted
  }

  pub fn recv_timing_resp<F: Fabric<FlatPort> + ?Sized>(&mut self, pkt: Packet, fabric: &mut F) -> bool {
    if self.mem_side.owes_retry() {
      return false;
    }
    let accepted = self.handle_response(pkt, fabric);
    if !accepted {
      self.mem_side.owe_retry();
    }
    self.outbox.flush(fabric);
    accepted
  }

  /// The memory side can take requests again.
  pub fn recv_req_retry<F: Fabric<FlatPort> + ?Sized>(&mut self, fabric: &mut F) {
    self.mem_side.unstall();
    assert!(
      self.upstream_blocked,
      "protocol violation: {} got a request retry with nothing blocked",
      self.name
    );
    self.upstream_blocked = false;
    self.outbox.invite(&mut self.bus_side);
    self.outbox.flush(fabric);
  }

  /// The bus side can take responses again.
  pub fn recv_resp_retry<F: Fabric<FlatPort> + ?Sized>(&mut self, fabric: &mut F) {
    self.bus_side.unstall();
    assert!(
      self.downstream_blocked,
      "protocol violation: {} got a response retry with nothing blocked",
      self.name
    );
    self.downstream_blocked = false;
    self.outbox.invite(&mut self.mem_side);
    self.outbox.flush(fabric);
  }

  fn handle_request<F: Fabric<FlatPort> + ?Sized>(&mut self, pkt: Packet, fabric: &mut F) -> bool {
    // The bus side owes a retry for as long as this is set, so
    // `recv_timing_req` already refused the packet.
    debug_assert!(!self.upstream_blocked, "{}: request reached a blocked upstream", self.name);
    trace!("{}: got request for addr {:#x}", self.name, pkt.addr);
    if !self.mem_side.send(fabric.peer(FlatPort::MemSide), pkt) {
      debug!("{}: memory busy, request blocked for addr {:#x}", self.name, pkt.addr);
      self.upstream_blocked = true;
      return false;
    }
    true
  }

  fn handle_response<F: Fabric<FlatPort> + ?Sized>(&mut self, pkt: Packet, fabric: &mut F) -> bool {
    debug_assert!(!self.downstream_blocked, "{}: response reached a blocked downstream", self.name);
    trace!("{}: got response for addr {:#x}", self.name, pkt.addr);
    if !self.bus_side.send(fabric.peer(FlatPort::BusSide), pkt) {
      debug!("{}: bus busy, response blocked for addr {:#x}", self.name, pkt.addr);
      self.downstream_blocked = true;
      return false;
    }
    true
  }
}
