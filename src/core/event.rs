use crate::error::{Error, Result};
use ordered_float::NotNan;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Kinds of events that can occur in the engine.
///
/// Tie-breaking for deterministic ordering at equal times: lower participant
/// index first, then kind in declaration order, then the other participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Particle-to-particle collision between particles `i < j`.
    Pair { i: u32, j: u32 },
    /// Particle `i` reaches wall `wall_id` (reflection, reservoir or periodic wrap).
    Wall { i: u32, wall_id: u32 },
    /// Particle `i` hits the divider outside the hole.
    Divider { i: u32 },
    /// Particle `i`'s centre crosses the divider plane through the hole.
    Hole { i: u32 },
    /// Particle `i`, partway through the hole, reaches the hole's rim.
    Rim { i: u32 },
    /// Particle `i` hits the moving piston face.
    Piston { i: u32 },
    /// The piston reaches its target and stops.
    PistonHalt,
}

impl EventKind {
    #[inline]
    fn order_key(&self) -> (u32, u8, u32) {
        match *self {
            EventKind::Pair { i, j } => (i.min(j), 0, i.max(j)),
            EventKind::Wall { i, wall_id } => (i, 1, wall_id),
            EventKind::Divider { i } => (i, 2, 0),
            EventKind::Hole { i } => (i, 3, 0),
            EventKind::Rim { i } => (i, 4, 0),
            EventKind::Piston { i } => (i, 5, 0),
            EventKind::PistonHalt => (u32::MAX, 6, 0),
        }
    }

    /// Participants whose stamps guard this event.
    #[inline]
    pub fn participants(&self) -> (Option<u32>, Option<u32>) {
        match *self {
            EventKind::Pair { i, j } => (Some(i), Some(j)),
            EventKind::Wall { i, .. }
            | EventKind::Divider { i }
            | EventKind::Hole { i }
            | EventKind::Rim { i }
            | EventKind::Piston { i } => (Some(i), None),
            EventKind::PistonHalt => (None, None),
        }
    }

    /// Boundary events depend on arena state and are guarded by the arena epoch too.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        !matches!(self, EventKind::Pair { .. })
    }
}

/// A scheduled event in the priority queue with deterministic ordering.
///
/// - `time`: event occurrence time (finite, non-NaN).
/// - `kind`: event kind and participants.
/// - `stamp_i`, `stamp_j`: participant stamps at scheduling time.
/// - `epoch`: arena epoch at scheduling time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub time: NotNan<f64>,
    pub kind: EventKind,
    pub stamp_i: u64,
    pub stamp_j: Option<u64>,
    pub epoch: u64,
}

impl Event {
    /// Create a new event, validating that time is finite and non-NaN.
    pub fn new(
        time: f64,
        kind: EventKind,
        stamp_i: u64,
        stamp_j: Option<u64>,
        epoch: u64,
    ) -> Result<Self> {
        if !time.is_finite() {
            return Err(Error::InvalidParam(format!(
                "event time must be finite and non-NaN (got {time})"
            )));
        }
        let time = NotNan::new(time)
            .map_err(|_| Error::InvalidParam("event time cannot be NaN".into()))?;
        Ok(Self {
            time,
            kind,
            stamp_i,
            stamp_j,
            epoch,
        })
    }

    /// Returns the raw f64 event time.
    #[inline]
    pub fn time_f64(&self) -> f64 {
        self.time.into_inner()
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => {
                let a = self.kind.order_key();
                let b = other.kind.order_key();
                match a.cmp(&b) {
                    // Final tie-breaker on stamps to ensure a total order.
                    Ordering::Equal => (self.stamp_i, self.stamp_j.unwrap_or(0), self.epoch)
                        .cmp(&(other.stamp_i, other.stamp_j.unwrap_or(0), other.epoch)),
                    o => o,
                }
            }
            o => o,
        }
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Time-ordered pending events with lazy invalidation.
///
/// Every particle has a stamp that `invalidate` bumps; events remember the
/// stamps of their participants and are skipped on `pop` once those change.
/// Boundary events additionally remember the arena epoch.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
    stamps: Vec<u64>,
    epoch: u64,
    discarded: u64,
}

impl EventQueue {
    pub fn new(num_particles: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            stamps: vec![0; num_particles],
            epoch: 0,
            discarded: 0,
        }
    }

    /// Drop every pending event and resize for `num_particles`.
    pub fn clear(&mut self, num_particles: usize) {
        self.heap.clear();
        self.stamps.clear();
        self.stamps.resize(num_particles, 0);
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Schedule `kind` at absolute `time`, stamped with the current participant state.
    pub fn insert(&mut self, time: f64, kind: EventKind) -> Result<()> {
        let (a, b) = kind.participants();
        let stamp_i = a.map_or(0, |i| self.stamps[i as usize]);
        let stamp_j = b.map(|j| self.stamps[j as usize]);
        let ev = Event::new(time, kind, stamp_i, stamp_j, self.epoch)?;
        self.heap.push(Reverse(ev));
        Ok(())
    }

    /// Every event previously scheduled against particle `i` becomes stale.
    #[inline]
    pub fn invalidate(&mut self, i: usize) {
        self.stamps[i] = self.stamps[i].wrapping_add(1);
    }

    /// Every boundary event becomes stale (arena geometry or rules changed).
    #[inline]
    pub fn invalidate_boundaries(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Remove stale events sitting at the top of the heap.
    fn skip_stale(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if is_current(&self.stamps, self.epoch, top) {
                break;
            }
            self.heap.pop();
            self.discarded += 1;
        }
    }

    /// Time of the earliest current event.
    pub fn peek_time(&mut self) -> Option<f64> {
        self.skip_stale();
        self.heap.peek().map(|Reverse(ev)| ev.time_f64())
    }

    /// Remove and return the earliest current event.
    pub fn pop(&mut self) -> Option<Event> {
        self.skip_stale();
        self.heap.pop().map(|Reverse(ev)| ev)
    }

    /// Purge stale entries once the heap exceeds `limit` entries.
    pub fn compact(&mut self, limit: usize) {
        if self.heap.len() <= limit {
            return;
        }
        let before = self.heap.len();
        let (stamps, epoch) = (&self.stamps, self.epoch);
        self.heap.retain(|Reverse(ev)| is_current(stamps, epoch, ev));
        self.discarded += (before - self.heap.len()) as u64;
        log::trace!("event queue compacted {} -> {}", before, self.heap.len());
    }

    /// Pending entries, stale ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Stale events dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

/// Whether `ev` was scheduled under the current participant stamps and arena epoch.
fn is_current(stamps: &[u64], epoch: u64, ev: &Event) -> bool {
    if ev.kind.is_boundary() && ev.epoch != epoch {
        return false;
    }
    match ev.kind.participants() {
        (Some(i), Some(j)) => {
            ev.stamp_i == stamps[i as usize] && ev.stamp_j == Some(stamps[j as usize])
        }
        (Some(i), None) => ev.stamp_i == stamps[i as usize],
        _ => true,
    }
}
