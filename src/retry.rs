/// Bounded attempt counter shared by the WiFi and SNTP supervisors.
///
/// Counts failures up to `max` and then sticks there; it never wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    attempt: u8,
    max: u8,
}

impl RetryCounter {
    pub fn new(max: u8) -> Self {
        Self { attempt: 0, max }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Record one failure and return the updated count.
    pub fn record_failure(&mut self) -> u8 {
        if self.attempt < self.max {
            self.attempt += 1;
        }
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max
    }

    pub fn attempt(&self) -> u8 {
        self.attempt
    }

    pub fn max(&self) -> u8 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_at_ceiling() {
        let mut c = RetryCounter::new(2);
        assert!(!c.is_exhausted());
        assert_eq!(c.record_failure(), 1);
        assert_eq!(c.record_failure(), 2);
        assert!(c.is_exhausted());
        assert_eq!(c.record_failure(), 2);
        assert_eq!(c.attempt(), 2);
    }

    #[test]
    fn zero_ceiling_starts_exhausted() {
        let mut c = RetryCounter::new(0);
        assert!(c.is_exhausted());
        assert_eq!(c.record_failure(), 0);
    }

    #[test]
    fn reset_clears_attempts() {
        let mut c = RetryCounter::new(u8::MAX);
        for _ in 0..300 {
            c.record_failure();
        }
        assert_eq!(c.attempt(), u8::MAX);
        c.reset();
        assert_eq!(c.attempt(), 0);
        assert_eq!(c.max(), u8::MAX);
    }
}
