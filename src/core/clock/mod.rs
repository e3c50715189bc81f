//! The periodic interval timer (SPEC_FULL.md section 4.7). Generalizes the
//! teacher crate's `BinaryHeap`-based event queue to the one recurring event
//! this core needs: a fixed-rate tick that posts TIMER (every tick) and
//! SLOW_CLK (every fourth tick) into GRP.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ClockTick,
}

#[derive(Debug, Clone)]
struct ClockEvent {
    event_type: EventType,
    timestamp: u64,
}

impl PartialEq for ClockEvent {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for ClockEvent {}

impl PartialOrd for ClockEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClockEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap: earliest timestamp pops first
        other.timestamp.cmp(&self.timestamp)
    }
}

/// Outcome of one clock tick: which GRP bits to assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickEffect {
    pub timer: bool,
    pub slow_clk: bool,
}

/// Event-driven periodic clock. `tick_interval` is the host-cycle distance
/// between ticks (derived from `clock_hz`, see `core::config::Config`);
/// `slow_clock_divisor` ticks assert SLOW_CLK in addition to TIMER.
pub struct Clock {
    events: BinaryHeap<ClockEvent>,
    current_time: u64,
    tick_interval: u64,
    slow_clock_divisor: u32,
    ticks: u64,
}

impl Clock {
    pub fn new(clock_hz: u32, slow_clock_divisor: u32) -> Self {
        let tick_interval = if clock_hz == 0 { 1 } else { 1_000_000 / clock_hz as u64 };
        let mut clock = Clock {
            events: BinaryHeap::new(),
            current_time: 0,
            tick_interval,
            slow_clock_divisor: slow_clock_divisor.max(1),
            ticks: 0,
        };
        clock.schedule_next();
        clock
    }

    fn schedule_next(&mut self) {
        let target = self.current_time + self.tick_interval;
        self.events.push(ClockEvent { event_type: EventType::ClockTick, timestamp: target });
    }

    /// Advances host time and fires any ticks now due, re-arming each as it
    /// fires. Call once per dispatcher iteration (SPEC_FULL.md section 4.4 step 1).
    pub fn advance(&mut self, host_cycles: u64) -> Vec<TickEffect> {
        self.current_time += host_cycles;
        let mut effects = Vec::new();
        while self.events.peek().is_some_and(|e| e.timestamp <= self.current_time) {
            self.events.pop();
            self.ticks += 1;
            effects.push(TickEffect {
                timer: true,
                slow_clk: self.ticks % self.slow_clock_divisor as u64 == 0,
            });
            self.schedule_next();
        }
        effects
    }

    pub fn current_time(&self) -> u64 {
        self.current_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asserts_timer_every_tick() {
        let mut clock = Clock::new(250, 4);
        let effects = clock.advance(4_000); // two ticks at 4000us interval
        assert!(effects.iter().all(|e| e.timer));
    }

    #[test]
    fn asserts_slow_clk_every_fourth_tick() {
        let mut clock = Clock::new(250, 4);
        let mut slow_ticks = 0;
        for _ in 0..4 {
            let effects = clock.advance(4_000);
            slow_ticks += effects.iter().filter(|e| e.slow_clk).count();
        }
        assert_eq!(slow_ticks, 1);
    }
}
