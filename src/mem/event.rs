//! Discrete-event scheduling: the capability injected into nodes and the
//! queue the simulator drains.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use super::packet::{Requester, Resource, Tick, Tier};

/// Events in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Dispatcher activity wake-up.
  Wake,
  /// A requester issues its next request.
  Issue(Requester),
  /// A requester resends its rejected request after an invite.
  ResendRequest(Requester),
  /// A storage tier resends its rejected response after an invite.
  ResendResponse(Tier),
  /// A resource finishes servicing its oldest request.
  Complete(Resource),
  /// A requester consumes one buffered response.
  Drain(Requester),
}

impl Event {
  /// Resends answer a retry invite and run ahead of anything else due at the
  /// same tick, so an invited sender acts before the next link changes state.
  fn rank(&self) -> u8 {
    match self {
      Event::ResendRequest(_) | Event::ResendResponse(_) => 0,
      _ => 1,
    }
  }
}

/// Lets a node put events on the simulation timeline without knowing who
/// owns it.
pub trait Scheduler {
  fn now(&self) -> Tick;
  fn schedule(&mut self, delay: Tick, event: Event);
}

#[derive(Debug, Clone)]
struct ScheduledEvent {
  tick: Tick,
  rank: u8,
  seq: u64,
  event: Event,
}

impl PartialEq for ScheduledEvent {
  fn eq(&self, other: &Self) -> bool {
    self.tick == other.tick && self.rank == other.rank && self.seq == other.seq
  }
}

impl Eq for ScheduledEvent {}

// BinaryHeap is a max-heap; order reversed so the earliest event pops first.
impl Ord for ScheduledEvent {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .tick
      .cmp(&self.tick)
      .then_with(|| other.rank.cmp(&self.rank))
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for ScheduledEvent {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Timestamp-ordered event queue. Same-tick events pop resends first, then in
/// insertion order.
#[derive(Debug, Default)]
pub struct EventQueue {
  now: Tick,
  next_seq: u64,
  heap: BinaryHeap<ScheduledEvent>,
}

impl EventQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pop(&mut self) -> Option<(Tick, Event)> {
    let next = self.heap.pop()?;
    self.now = next.tick;
    Some((next.tick, next.event))
  }

  pub fn peek_tick(&self) -> Option<Tick> {
    self.heap.peek().map(|e| e.tick)
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }
}

impl Scheduler for EventQueue {
  fn now(&self) -> Tick {
    self.now
  }

  fn schedule(&mut self, delay: Tick, event: Event) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.heap.push(ScheduledEvent {
      tick: self.now + delay,
      rank: event.rank(),
      seq,
      event,
    });
  }
}

/// Shared handle on one `EventQueue`, handed to every node and peer of a
/// simulation.
#[derive(Debug, Clone, Default)]
pub struct EventHandle(Rc<RefCell<EventQueue>>);

impl EventHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pop(&self) -> Option<(Tick, Event)> {
    self.0.borrow_mut().pop()
  }

  pub fn peek_tick(&self) -> Option<Tick> {
    self.0.borrow().peek_tick()
  }

  pub fn len(&self) -> usize {
    self.0.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.borrow().is_empty()
  }
}

impl Scheduler for EventHandle {
  fn now(&self) -> Tick {
    self.0.borrow().now()
  }

  fn schedule(&mut self, delay: Tick, event: Event) {
    self.0.borrow_mut().schedule(delay, event);
  }
}
