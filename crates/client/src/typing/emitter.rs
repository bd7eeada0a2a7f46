// Local typing indicator: keystrokes in, start/stop signals out.
//
// One burst runs from the first keystroke until a stop. A stop fires after
// `debounce` of inactivity, or `failsafe` after the burst began even if
// input continues, or immediately when the input is cleared. Each burst
// ends with exactly one stop.

use std::time::Duration;

use tokio::time::Instant;

/// Default quiet period before a stop.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);
/// Default ceiling on a single burst.
pub const DEFAULT_FAILSAFE: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct EmitterConfig {
    pub debounce: Duration,
    pub failsafe: Duration,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self { debounce: DEFAULT_DEBOUNCE, failsafe: DEFAULT_FAILSAFE }
    }
}

#[derive(Debug, Clone, Copy)]
struct Burst {
    started_at: Instant,
    last_input: Instant,
}

#[derive(Debug)]
pub struct TypingEmitter {
    config: EmitterConfig,
    burst: Option<Burst>,
}

impl TypingEmitter {
    pub fn new(config: EmitterConfig) -> Self {
        Self { config, burst: None }
    }

    pub fn is_typing(&self) -> bool {
        self.burst.is_some()
    }

    /// Content of the input changed to `content`.
    pub fn on_input(&mut self, content: &str, now: Instant) -> Option<TypingSignal> {
        if content.is_empty() {
            return self.burst.take().map(|_| TypingSignal::Stop);
        }
        match &mut self.burst {
            Some(burst) => burst.last_input = now,
            None => self.burst = Some(Burst { started_at: now, last_input: now }),
        }
        Some(TypingSignal::Start)
    }

    /// Fire the pending stop if either timer has elapsed by `now`.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        let deadline = self.next_deadline()?;
        if now >= deadline {
            self.burst = None;
            return Some(TypingSignal::Stop);
        }
        None
    }

    /// When the pending stop is due: the earlier of the trailing debounce
    /// and the burst ceiling.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.burst.map(|burst| {
            let quiet = burst.last_input + self.config.debounce;
            let ceiling = burst.started_at + self.config.failsafe;
            quiet.min(ceiling)
        })
    }

    /// End the current burst now, e.g. when leaving the conversation.
    pub fn finish(&mut self) -> Option<TypingSignal> {
        self.burst.take().map(|_| TypingSignal::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn emitter() -> TypingEmitter {
        TypingEmitter::new(EmitterConfig::default())
    }

    #[test]
    fn every_non_empty_change_emits_start() {
        let mut emitter = emitter();
        let t0 = Instant::now();

        assert_eq!(emitter.on_input("h", t0), Some(TypingSignal::Start));
        assert_eq!(emitter.on_input("he", t0 + ms(100)), Some(TypingSignal::Start));
        assert!(emitter.is_typing());
    }

    #[test]
    fn stop_after_quiet_period() {
        let mut emitter = emitter();
        let t0 = Instant::now();
        emitter.on_input("h", t0);
        emitter.on_input("hi", t0 + ms(400));

        assert_eq!(emitter.poll(t0 + ms(1399)), None);
        assert_eq!(emitter.poll(t0 + ms(1400)), Some(TypingSignal::Stop));
        assert_eq!(emitter.poll(t0 + ms(5000)), None);
        assert!(!emitter.is_typing());
    }

    #[test]
    fn failsafe_stops_continuous_typing() {
        let mut emitter = emitter();
        let t0 = Instant::now();

        // A keystroke every 500ms never lets the debounce fire.
        let mut stops = Vec::new();
        for step in 0..8u64 {
            let now = t0 + ms(step * 500);
            if let Some(signal) = emitter.poll(now) {
                stops.push(step);
                assert_eq!(signal, TypingSignal::Stop);
            }
            emitter.on_input("typing...", now);
        }

        assert_eq!(stops, [6]);
    }

    #[test]
    fn input_after_failsafe_starts_a_new_burst() {
        let mut emitter = emitter();
        let t0 = Instant::now();
        emitter.on_input("a", t0);
        emitter.on_input("ab", t0 + ms(900));
        emitter.on_input("abc", t0 + ms(1800));
        emitter.on_input("abcd", t0 + ms(2700));
        assert_eq!(emitter.poll(t0 + ms(3000)), Some(TypingSignal::Stop));

        assert_eq!(emitter.on_input("abcde", t0 + ms(3100)), Some(TypingSignal::Start));
        assert_eq!(emitter.next_deadline(), Some(t0 + ms(4100)));
    }

    #[test]
    fn clearing_input_stops_immediately_once() {
        let mut emitter = emitter();
        let t0 = Instant::now();
        emitter.on_input("hi", t0);

        assert_eq!(emitter.on_input("", t0 + ms(10)), Some(TypingSignal::Stop));
        assert_eq!(emitter.on_input("", t0 + ms(20)), None);
        assert_eq!(emitter.poll(t0 + ms(5000)), None);
    }

    #[test]
    fn deadline_is_earlier_of_debounce_and_ceiling() {
        let mut emitter = emitter();
        let t0 = Instant::now();
        assert_eq!(emitter.next_deadline(), None);

        emitter.on_input("a", t0);
        assert_eq!(emitter.next_deadline(), Some(t0 + ms(1000)));

        emitter.on_input("ab", t0 + ms(2500));
        assert_eq!(emitter.next_deadline(), Some(t0 + ms(3000)));
    }

    #[test]
    fn finish_only_stops_an_active_burst() {
        let mut emitter = emitter();
        assert_eq!(emitter.finish(), None);
        emitter.on_input("a", Instant::now());
        assert_eq!(emitter.finish(), Some(TypingSignal::Stop));
    }
}
