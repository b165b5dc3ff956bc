//! Links between a node and its peers, and the retry handshake they share.

use log::debug;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use super::addr_range::AddrRange;
use super::packet::{Packet, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortRole {
  /// Faces a requester: receives requests, sends responses.
  Upstream,
  /// Faces a resource: sends requests, receives responses.
  Downstream,
}

/// What every peer on the other side of a link exposes.
pub trait Peer {
  /// Offer a packet without blocking. `false` means the peer is saturated
  /// and owes the sender a `retry_invite` once it frees up.
  fn try_send(&mut self, pkt: Packet) -> bool;

  /// Edge-triggered "you may resend now". Only the previously rejected
  /// packet may be resent.
  fn retry_invite(&mut self);

  fn address_ranges(&self) -> Vec<AddrRange> {
    Vec::new()
  }

  fn range_change(&mut self) {}

  /// Synchronous access outside the timing protocol; returns its latency.
  fn atomic_transfer(&mut self, _pkt: &mut Packet) -> Tick {
    0
  }

  fn functional_transfer(&mut self, _pkt: &mut Packet) {}
}

/// Resolves a link identity to the peer bound on it.
pub trait Fabric<P> {
  fn peer(&mut self, port: P) -> &mut dyn Peer;
}

/// Node-side state of one link.
///
/// `retry_owed` tracks the inbound direction (we rejected the peer), while
/// `stalled` tracks the outbound direction (the peer rejected us).
#[derive(Debug, Clone)]
pub struct Port<P> {
  id: P,
  role: PortRole,
  retry_owed: bool,
  stalled: bool,
}

impl<P: Copy + fmt::Display> Port<P> {
  pub fn new(id: P, role: PortRole) -> Self {
    Self {
      id,
      role,
      retry_owed: false,
      stalled: false,
    }
  }

  pub fn id(&self) -> P {
    self.id
  }

  pub fn role(&self) -> PortRole {
    self.role
  }

  pub fn is_stalled(&self) -> bool {
    self.stalled
  }

  pub fn owes_retry(&self) -> bool {
    self.retry_owed
  }

  /// Forward `pkt` to the peer. A rejection stalls the link until the peer
  /// invites a retry.
  pub fn send(&mut self, peer: &mut dyn Peer, pkt: Packet) -> bool {
    assert!(!self.stalled, "protocol violation: {} should never try to send if blocked", self.id);
    if peer.try_send(pkt) {
      true
    } else {
      self.stalled = true;
      false
    }
  }

  /// The peer invited a retry.
  pub fn unstall(&mut self) {
    assert!(self.stalled, "protocol violation: {} got a retry but never stalled", self.id);
    self.stalled = false;
  }

  pub fn owe_retry(&mut self) {
    self.retry_owed = true;
  }

  /// Consume the owed retry. Returns whether an invite has to go out.
  pub fn take_retry(&mut self) -> bool {
    std::mem::take(&mut self.retry_owed)
  }
}

/// Retry invites waiting to be delivered.
///
/// Handlers only enqueue here; the node flushes the queue after its own state
/// is committed, so a peer reacting to an invite never observes a half-done
/// transition.
#[derive(Debug)]
pub struct RetryOutbox<P> {
  pending: VecDeque<P>,
}

impl<P> Default for RetryOutbox<P> {
  fn default() -> Self {
    Self {
      pending: VecDeque::new(),
    }
  }
}

impl<P: Copy + fmt::Display> RetryOutbox<P> {
  /// Queue an invite for `port` if it owes one. No-op otherwise.
  pub fn invite(&mut self, port: &mut Port<P>) -> bool {
    if port.take_retry() {
      self.pending.push_back(port.id());
      true
    } else {
      false
    }
  }

  pub fn flush<F: Fabric<P> + ?Sized>(&mut self, fabric: &mut F) -> usize {
    let mut sent = 0;
    while let Some(id) = self.pending.pop_front() {
      debug!("sending retry invite to {}", id);
      fabric.peer(id).retry_invite();
      sent += 1;
    }
    sent
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }
}
