//! Correlation-id generation.
//!
//! The hub correlates traffic through 17-digit decimal ids shaped like
//! a local timestamp (`YYYYMMDDHHmmssSSS`, e.g. `20200321134209916`).
//! Ids must be strictly increasing for the lifetime of a client, even
//! under sub-millisecond bursts or a backwards clock step, so the
//! generator remembers the last id it handed out and bumps past it
//! when the clock alone would repeat or regress.

use chrono::{DateTime, Local};

/// Stateful generator of strictly increasing message ids.
///
/// One instance per client; callers serialize access externally (the
/// client keeps it behind its own lock). Never a process-wide global.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last_id: Option<u64>,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next id from the current wall clock.
    pub fn next(&mut self) -> String {
        self.next_at(Local::now())
    }

    /// Produce the next id from an explicit instant. Split out so the
    /// monotonicity guarantee is testable under a frozen or backwards
    /// clock.
    pub fn next_at(&mut self, now: DateTime<Local>) -> String {
        // 17 decimal digits fit comfortably in a u64.
        let mut id: u64 = now
            .format("%Y%m%d%H%M%S%3f")
            .to_string()
            .parse()
            .unwrap_or(0);

        if let Some(last) = self.last_id {
            if id <= last {
                id = last + 1;
            }
        }
        self.last_id = Some(id);
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::TimeZone;

    use super::*;

    fn instant(millis: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2020, 3, 21, 13, 42, 9)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(i64::from(millis)))
            .unwrap()
    }

    #[test]
    fn formats_seventeen_digit_timestamp() {
        let mut generator = MessageIdGenerator::new();
        let id = generator.next_at(instant(916));
        assert_eq!(id, "20200321134209916");
        assert_eq!(id.len(), 17);
    }

    #[test]
    fn frozen_clock_still_increases() {
        let mut generator = MessageIdGenerator::new();
        let a = generator.next_at(instant(500));
        let b = generator.next_at(instant(500));
        let c = generator.next_at(instant(500));
        assert!(b.parse::<u64>().unwrap() > a.parse::<u64>().unwrap());
        assert!(c.parse::<u64>().unwrap() > b.parse::<u64>().unwrap());
    }

    #[test]
    fn backwards_clock_still_increases() {
        let mut generator = MessageIdGenerator::new();
        let a = generator.next_at(instant(900));
        let b = generator.next_at(instant(100));
        assert!(b.parse::<u64>().unwrap() > a.parse::<u64>().unwrap());
    }

    #[test]
    fn advancing_clock_uses_the_clock() {
        let mut generator = MessageIdGenerator::new();
        let _ = generator.next_at(instant(100));
        let b = generator.next_at(instant(200));
        assert_eq!(b, "20200321134209200");
    }

    #[test]
    fn generators_are_isolated() {
        let mut a = MessageIdGenerator::new();
        let mut b = MessageIdGenerator::new();
        let first = a.next_at(instant(100));
        let second = b.next_at(instant(100));
        // Separate instances do not share last-id state.
        assert_eq!(first, second);
    }
}
