use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrRange {
  pub start: u64,
  pub end: u64,
}

impl AddrRange {
  pub fn new(start: u64, end: u64) -> Self {
    Self { start, end }
  }

  pub fn contains(&self, addr: u64) -> bool {
    addr >= self.start && addr < self.end
  }

  pub fn is_empty(&self) -> bool {
    self.end <= self.start
  }

  pub fn size(&self) -> u64 {
    self.end.saturating_sub(self.start)
  }
}

impl fmt::Display for AddrRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{:#x}, {:#x})", self.start, self.end)
  }
}

/// Collapse a set of ranges into the single range spanning all of them:
/// the smallest start to the largest end. Empty input yields `None`.
pub fn span<'a, I>(ranges: I) -> Option<AddrRange>
where
  I: IntoIterator<Item = &'a AddrRange>,
{
  ranges.into_iter().fold(None, |acc, r| match acc {
    None => Some(*r),
    Some(a) => Some(AddrRange::new(a.start.min(r.start), a.end.max(r.end))),
  })
}
