//! Event clock and timeline.
//!
//! Orders all incoming market data and scheduled module triggers by
//! ascending `(timestamp, source registration order, insertion order)`,
//! implemented as a k-way merge over lazily-pulled streams. The clock holds
//! no business logic; it is the single source of "now" for a run.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use tapesim_core::error::{Error, Result};
use tapesim_core::events::MarketEvent;
use tapesim_core::types::TimestampMs;
use tracing::debug;

/// A registered source of market events.
///
/// Streams must yield events strictly non-decreasing in timestamp, are
/// finite, and are consumed single-pass.
pub trait MarketStream {
    fn next_event(&mut self) -> Option<MarketEvent>;
}

/// An in-memory stream over a pre-built event vector.
pub struct VecStream {
    events: std::vec::IntoIter<MarketEvent>,
}

impl VecStream {
    pub fn new(events: Vec<MarketEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }
}

impl MarketStream for VecStream {
    fn next_event(&mut self) -> Option<MarketEvent> {
        self.events.next()
    }
}

/// Generator of scheduled trigger timestamps for a simulation module.
pub trait TriggerSchedule {
    /// The first trigger strictly after `ts`, or None when the schedule is
    /// exhausted.
    fn next_after(&mut self, ts: TimestampMs) -> Option<TimestampMs>;
}

/// Handle to a registered schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleId(pub usize);

/// An event emitted by the clock.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    /// A market data event, with its arrival sequence assigned.
    Market(MarketEvent),
    /// A scheduled module trigger.
    Trigger {
        schedule: ScheduleId,
        ts: TimestampMs,
    },
}

/// Heap entry: min by (ts, source ordinal). Sources are market streams and
/// schedules in one ordinal space, assigned at registration.
#[derive(Debug, PartialEq, Eq)]
struct HeapKey {
    ts: TimestampMs,
    ordinal: usize,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest first.
        (other.ts, other.ordinal).cmp(&(self.ts, self.ordinal))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum Source {
    Stream {
        stream: Box<dyn MarketStream>,
        /// One-event lookahead; the heap key mirrors its timestamp.
        head: Option<MarketEvent>,
    },
    Schedule {
        id: ScheduleId,
        schedule: Box<dyn TriggerSchedule>,
        next: Option<TimestampMs>,
    },
}

/// Deterministic k-way merge over registered streams and module schedules.
pub struct EventClock {
    sources: Vec<Source>,
    heap: BinaryHeap<HeapKey>,
    schedule_count: usize,
    started: bool,
    /// Timestamp of the last emitted event.
    now: Option<TimestampMs>,
    next_seq: u64,
    /// Consumed trigger occurrences, guaranteeing at-most-once delivery.
    consumed: HashSet<(usize, TimestampMs)>,
    live_streams: usize,
}

impl EventClock {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            heap: BinaryHeap::new(),
            schedule_count: 0,
            started: false,
            now: None,
            next_seq: 0,
            consumed: HashSet::new(),
            live_streams: 0,
        }
    }

    /// Timestamp of the last emitted event.
    pub fn now(&self) -> Option<TimestampMs> {
        self.now
    }

    /// Register a market data stream. Fails once the run has started.
    pub fn register_stream(&mut self, stream: Box<dyn MarketStream>) -> Result<()> {
        if self.started {
            return Err(Error::invalid_state(
                "cannot register a stream after the run has started",
            ));
        }
        self.sources.push(Source::Stream { stream, head: None });
        Ok(())
    }

    /// Register a module trigger schedule. Fails once the run has started.
    pub fn register_schedule(&mut self, schedule: Box<dyn TriggerSchedule>) -> Result<ScheduleId> {
        if self.started {
            return Err(Error::invalid_state(
                "cannot register a schedule after the run has started",
            ));
        }
        let id = ScheduleId(self.schedule_count);
        self.schedule_count += 1;
        self.sources.push(Source::Schedule {
            id,
            schedule,
            next: None,
        });
        Ok(id)
    }

    /// Prime stream heads and the merge heap on first use.
    fn start(&mut self) {
        self.started = true;
        // Pull each stream's first event.
        let mut first_ts: Option<TimestampMs> = None;
        for (ordinal, source) in self.sources.iter_mut().enumerate() {
            if let Source::Stream { stream, head } = source {
                *head = stream.next_event();
                if let Some(event) = head {
                    first_ts = Some(first_ts.map_or(event.ts, |ts: i64| ts.min(event.ts)));
                    self.heap.push(HeapKey {
                        ts: event.ts,
                        ordinal,
                    });
                    self.live_streams += 1;
                }
            }
        }
        // Schedules activate relative to the first market timestamp: the
        // first trigger is the first boundary strictly after the data begins.
        if let Some(start_ts) = first_ts {
            for (ordinal, source) in self.sources.iter_mut().enumerate() {
                if let Source::Schedule { schedule, next, .. } = source {
                    *next = schedule.next_after(start_ts);
                    if let Some(ts) = *next {
                        self.heap.push(HeapKey { ts, ordinal });
                    }
                }
            }
        }
        debug!(
            streams = self.live_streams,
            schedules = self.schedule_count,
            "timeline started"
        );
    }

    /// Pop the single next event across all sources.
    ///
    /// Returns `Ok(None)` when all streams are exhausted and no pending
    /// scheduled triggers remain. A stream yielding a timestamp earlier than
    /// the clock's position is a fatal `DataOrderingViolation`.
    pub fn advance(&mut self) -> Result<Option<TimelineEvent>> {
        if !self.started {
            self.start();
        }
        loop {
            let key = match self.heap.pop() {
                Some(key) => key,
                None => return Ok(None),
            };
            if let Some(now) = self.now {
                if key.ts < now {
                    let source = self.describe(key.ordinal);
                    return Err(Error::data_ordering(format!(
                        "{source} yielded timestamp {} behind clock position {now}",
                        key.ts
                    )));
                }
            }
            match &mut self.sources[key.ordinal] {
                Source::Stream { stream, head } => {
                    let event = head.take().expect("stream head present for heap entry");
                    debug_assert_eq!(event.ts, key.ts);
                    *head = stream.next_event();
                    match head {
                        Some(next) => self.heap.push(HeapKey {
                            ts: next.ts,
                            ordinal: key.ordinal,
                        }),
                        None => self.live_streams -= 1,
                    }
                    self.now = Some(event.ts);
                    self.next_seq += 1;
                    let mut event = event;
                    event.seq = self.next_seq;
                    return Ok(Some(TimelineEvent::Market(event)));
                }
                Source::Schedule { id, schedule, next } => {
                    // Triggers strictly past the final market event are not
                    // pending: with no data left there is nothing to mark or
                    // settle against.
                    if self.live_streams == 0 && self.now.map_or(true, |now| key.ts > now) {
                        *next = None;
                        continue;
                    }
                    let id = *id;
                    debug_assert_eq!(*next, Some(key.ts));
                    *next = schedule.next_after(key.ts);
                    if let Some(ts) = *next {
                        self.heap.push(HeapKey {
                            ts,
                            ordinal: key.ordinal,
                        });
                    }
                    if !self.consumed.insert((key.ordinal, key.ts)) {
                        // Trigger instance already delivered once; skip.
                        continue;
                    }
                    self.now = Some(key.ts);
                    return Ok(Some(TimelineEvent::Trigger {
                        schedule: id,
                        ts: key.ts,
                    }));
                }
            }
        }
    }

    fn describe(&self, ordinal: usize) -> String {
        match &self.sources[ordinal] {
            Source::Stream { .. } => format!("stream #{ordinal}"),
            Source::Schedule { id, .. } => format!("schedule #{}", id.0),
        }
    }
}

impl Default for EventClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed interval schedule anchored at a phase offset (e.g. daily at a
/// session boundary).
pub struct IntervalSchedule {
    interval_ms: i64,
    offset_ms: i64,
}

impl IntervalSchedule {
    pub fn new(interval_ms: i64, offset_ms: i64) -> Self {
        assert!(interval_ms > 0, "interval must be positive");
        Self {
            interval_ms,
            offset_ms,
        }
    }

    /// Daily schedule at a fixed UTC hour.
    pub fn daily_at_hour(hour_utc: u32) -> Self {
        Self::new(86_400_000, hour_utc as i64 * 3_600_000)
    }
}

impl TriggerSchedule for IntervalSchedule {
    fn next_after(&mut self, ts: TimestampMs) -> Option<TimestampMs> {
        let shifted = ts - self.offset_ms;
        let periods = shifted.div_euclid(self.interval_ms) + 1;
        Some(periods * self.interval_ms + self.offset_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapesim_core::events::Trade;
    use tapesim_core::identifiers::InstrumentId;
    use tapesim_core::types::{Price, Quantity};

    fn make_event(ts: i64) -> MarketEvent {
        MarketEvent::trade(
            ts,
            InstrumentId::new("EUR/USD", "SIM"),
            Trade {
                price: Price::new(1.1, 5),
                size: Quantity::new(1.0, 0),
            },
        )
    }

    fn drain(clock: &mut EventClock) -> Vec<TimelineEvent> {
        let mut out = Vec::new();
        while let Some(event) = clock.advance().unwrap() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_merge_is_time_ordered() {
        let mut clock = EventClock::new();
        clock
            .register_stream(Box::new(VecStream::new(vec![
                make_event(100),
                make_event(300),
            ])))
            .unwrap();
        clock
            .register_stream(Box::new(VecStream::new(vec![
                make_event(50),
                make_event(200),
                make_event(400),
            ])))
            .unwrap();

        let timestamps: Vec<i64> = drain(&mut clock)
            .iter()
            .map(|e| match e {
                TimelineEvent::Market(m) => m.ts,
                TimelineEvent::Trigger { ts, .. } => *ts,
            })
            .collect();
        assert_eq!(timestamps, vec![50, 100, 200, 300, 400]);
    }

    #[test]
    fn test_ties_break_by_registration_order() {
        let mut clock = EventClock::new();
        let a = make_event(100);
        let mut b = make_event(100);
        b.instrument_id = InstrumentId::new("GBP/USD", "SIM");
        clock
            .register_stream(Box::new(VecStream::new(vec![a])))
            .unwrap();
        clock
            .register_stream(Box::new(VecStream::new(vec![b])))
            .unwrap();

        let events = drain(&mut clock);
        match (&events[0], &events[1]) {
            (TimelineEvent::Market(first), TimelineEvent::Market(second)) => {
                assert_eq!(first.instrument_id.symbol.0, "EUR/USD");
                assert_eq!(second.instrument_id.symbol.0, "GBP/USD");
                assert_eq!(first.seq, 1);
                assert_eq!(second.seq, 2);
            }
            other => panic!("expected two market events, got {other:?}"),
        }
    }

    #[test]
    fn test_register_after_start_fails() {
        let mut clock = EventClock::new();
        clock
            .register_stream(Box::new(VecStream::new(vec![make_event(1)])))
            .unwrap();
        clock.advance().unwrap();
        let err = clock
            .register_stream(Box::new(VecStream::new(vec![])))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_backwards_stream_is_fatal() {
        let mut clock = EventClock::new();
        clock
            .register_stream(Box::new(VecStream::new(vec![
                make_event(200),
                make_event(100),
            ])))
            .unwrap();
        clock.advance().unwrap();
        let err = clock.advance().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::DataOrderingViolation(_)));
    }

    #[test]
    fn test_schedule_triggers_interleave() {
        let mut clock = EventClock::new();
        clock
            .register_stream(Box::new(VecStream::new(vec![
                make_event(0),
                make_event(2_500),
            ])))
            .unwrap();
        clock
            .register_schedule(Box::new(IntervalSchedule::new(1_000, 0)))
            .unwrap();

        let events = drain(&mut clock);
        // Market at 0, triggers at 1000 and 2000, market at 2500; the
        // trigger at 3000 is beyond the final event and does not fire.
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], TimelineEvent::Market(_)));
        assert!(
            matches!(events[1], TimelineEvent::Trigger { ts: 1_000, .. }),
            "got {:?}",
            events[1]
        );
        assert!(matches!(events[2], TimelineEvent::Trigger { ts: 2_000, .. }));
        assert!(matches!(events[3], TimelineEvent::Market(_)));
    }

    #[test]
    fn test_trigger_at_event_timestamp_fires_after_event() {
        let mut clock = EventClock::new();
        clock
            .register_stream(Box::new(VecStream::new(vec![
                make_event(500),
                make_event(1_000),
                make_event(1_500),
            ])))
            .unwrap();
        clock
            .register_schedule(Box::new(IntervalSchedule::new(1_000, 0)))
            .unwrap();

        let events = drain(&mut clock);
        let kinds: Vec<i64> = events
            .iter()
            .map(|e| match e {
                TimelineEvent::Market(m) => m.ts,
                TimelineEvent::Trigger { ts, .. } => -ts,
            })
            .collect();
        // Streams registered before schedules win timestamp ties.
        assert_eq!(kinds, vec![500, 1_000, -1_000, 1_500]);
    }

    #[test]
    fn test_interval_schedule_daily_boundary() {
        let mut schedule = IntervalSchedule::daily_at_hour(21);
        // 2024-01-01 00:00:00 UTC
        let start = 1_704_067_200_000i64;
        let first = schedule.next_after(start).unwrap();
        assert_eq!(first, start + 21 * 3_600_000);
        let second = schedule.next_after(first).unwrap();
        assert_eq!(second, first + 86_400_000);
    }
}
