//! Reorder buffer and playback clock
//!
//! Brokers deliver records per partition, not in global time order. During
//! the priming window every message is buffered; once streaming starts, a
//! virtual clock set to the earliest buffered timestamp advances by one
//! tick per period, and each tick releases the messages it has passed.

mod buffer;

pub use buffer::ReorderBuffer;

use chrono::{DateTime, Utc};

use crate::config::PlaybackConfig;
use crate::model::Message;

/// Playback phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Buffering only
    Priming,
    /// Releasing messages every tick
    Streaming,
}

/// Virtual clock gating which buffered messages may be dispatched
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    state: PlaybackState,
    now: Option<DateTime<Utc>>,
    tick: chrono::Duration,
}

impl PlaybackClock {
    pub fn new(tick: std::time::Duration) -> Self {
        let millis = i64::try_from(tick.as_millis()).unwrap_or(i64::MAX);
        Self {
            state: PlaybackState::Priming,
            now: None,
            tick: chrono::Duration::milliseconds(millis),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Current virtual time; `None` while priming
    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.now
    }

    /// Leave priming with the clock set to `start`
    pub fn begin_streaming(&mut self, start: DateTime<Utc>) {
        if self.state == PlaybackState::Priming {
            self.state = PlaybackState::Streaming;
            self.now = Some(start);
        }
    }

    /// Move the virtual clock forward by one tick
    pub fn advance(&mut self) {
        if let Some(now) = self.now {
            self.now = Some(now.checked_add_signed(self.tick).unwrap_or(now));
        }
    }
}

/// Buffer plus clock: the whole playback state of a session
#[derive(Debug)]
pub struct Playback {
    buffer: ReorderBuffer,
    clock: PlaybackClock,
    max_per_tick: usize,
}

impl Playback {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            buffer: ReorderBuffer::new(),
            clock: PlaybackClock::new(config.tick),
            max_per_tick: config.max_per_tick,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.clock.state()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a message, stamping it with `now` if it has no timestamp
    pub fn insert(&mut self, mut msg: Message, now: DateTime<Utc>) {
        msg.stamp_if_missing(now);
        self.buffer.insert(msg);
    }

    /// End priming. The clock starts at the earliest buffered message, or
    /// at `now` when nothing arrived.
    pub fn start(&mut self, now: DateTime<Utc>) {
        let start = self.buffer.earliest().unwrap_or(now);
        self.clock.begin_streaming(start);
    }

    /// Release due messages in timestamp order, then advance the clock.
    /// Returns nothing while priming.
    pub fn tick(&mut self) -> Vec<Message> {
        let Some(now) = self.clock.now() else {
            return Vec::new();
        };
        let due = self.buffer.drain_until(now, self.max_per_tick);
        self.clock.advance();
        due
    }
}
