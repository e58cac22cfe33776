//! Scheduled parameter automation
//!
//! A [`Param`] holds a value that moves along a timeline of events:
//! instantaneous sets and linear ramps. A ramp starts from the value and
//! time of the event before it, so queued ramps chain into segments.
//! Everything is evaluated lazily against an audio clock in seconds.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    Set { time: f64, value: f64 },
    Ramp { time: f64, value: f64 },
}

impl Event {
    fn time(&self) -> f64 {
        match *self {
            Event::Set { time, .. } | Event::Ramp { time, .. } => time,
        }
    }

    fn value(&self) -> f64 {
        match *self {
            Event::Set { value, .. } | Event::Ramp { value, .. } => value,
        }
    }
}

/// An automatable value on the audio clock
#[derive(Debug, Clone)]
pub struct Param {
    /// Value and time of the last event that has passed
    anchor_value: f64,
    anchor_time: f64,
    /// Value at the time of the last `advance`
    current: f64,
    events: VecDeque<Event>,
}

impl Param {
    pub fn new(value: f64) -> Self {
        Self {
            anchor_value: value,
            anchor_time: 0.0,
            current: value,
            events: VecDeque::new(),
        }
    }

    /// Value as of the last [`Param::advance`]
    pub fn value(&self) -> f64 {
        self.current
    }

    /// Value the timeline settles on once every event has passed
    pub fn target(&self) -> f64 {
        self.events.back().map_or(self.anchor_value, Event::value)
    }

    /// Time of the last scheduled event, or the anchor time if none
    pub fn settles_at(&self) -> f64 {
        self.events.back().map_or(self.anchor_time, Event::time)
    }

    pub fn has_pending(&self) -> bool {
        !self.events.is_empty()
    }

    /// Move the clock to `now` and return the value there
    pub fn advance(&mut self, now: f64) -> f64 {
        while let Some(event) = self.events.front().copied() {
            if event.time() > now {
                break;
            }
            self.anchor_value = event.value();
            self.anchor_time = event.time();
            self.events.pop_front();
        }

        self.current = match self.events.front() {
            Some(&Event::Ramp { time, value }) if time > self.anchor_time => {
                let progress = ((now - self.anchor_time) / (time - self.anchor_time)).clamp(0.0, 1.0);
                self.anchor_value + (value - self.anchor_value) * progress
            }
            _ => self.anchor_value,
        };
        self.current
    }

    /// Jump to `value` at `time`
    pub fn set_value_at(&mut self, value: f64, time: f64) {
        self.insert(Event::Set { time, value });
    }

    /// Ramp linearly from the previous event to `value`, arriving at `end_time`
    pub fn linear_ramp_to(&mut self, value: f64, end_time: f64) {
        self.insert(Event::Ramp { time: end_time, value });
    }

    /// Drop every event after `now` and hold the value reached there
    pub fn cancel_and_hold(&mut self, now: f64) {
        let held = self.advance(now);
        self.events.clear();
        self.anchor_value = held;
        self.anchor_time = now;
    }

    /// Ramp to `value` by `end_time`.
    ///
    /// Pending events that would land after `end_time` are dropped, so the
    /// newest target always wins. The ramp is queued behind what remains,
    /// or starts from the current value at `now` if nothing does.
    pub fn ramp_to(&mut self, value: f64, now: f64, end_time: f64) {
        let end_time = end_time.max(now);
        self.advance(now);
        self.events.retain(|e| e.time() <= end_time);
        if self.events.is_empty() {
            self.anchor_value = self.current;
            self.anchor_time = now;
        }
        self.linear_ramp_to(value, end_time);
    }

    /// Forget the schedule and sit at `value` from `now` on
    pub fn reset(&mut self, value: f64, now: f64) {
        self.events.clear();
        self.anchor_value = value;
        self.anchor_time = now;
        self.current = value;
    }

    fn insert(&mut self, event: Event) {
        let index = self
            .events
            .iter()
            .position(|e| e.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(index, event);
    }
}
