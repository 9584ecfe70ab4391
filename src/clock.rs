use core::fmt;

use log::info;

extern "C" {
    fn tzset();
}

/// Hour, minute and second of local time taken from a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClockSample {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl WallClockSample {
    pub const fn new(hour: u8, minute: u8, second: u8) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Coarse "the clock has been set" check.
    ///
    /// An unset clock starts at the epoch, which reads as hour 0.
    pub fn is_plausible(&self) -> bool {
        self.hour > 0
    }
}

impl fmt::Display for WallClockSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Source of wall-clock time.
pub trait Clock {
    /// Take a fresh sample. Callers must not cache it across sleeps.
    fn now(&self) -> WallClockSample;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> WallClockSample {
        (**self).now()
    }
}

/// Local time from the C library (`time` + `localtime_r`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> WallClockSample {
        let mut now: libc::time_t = 0;
        let mut tm: libc::tm = unsafe { core::mem::zeroed() };
        unsafe {
            libc::time(&mut now);
            libc::localtime_r(&now, &mut tm);
        }
        WallClockSample::new(
            clamp_field(tm.tm_hour, 23),
            clamp_field(tm.tm_min, 59),
            // 60 is a valid leap second
            clamp_field(tm.tm_sec, 60),
        )
    }
}

fn clamp_field(value: libc::c_int, max: u8) -> u8 {
    value.clamp(0, max as libc::c_int) as u8
}

/// Apply a POSIX TZ rule to the process, e.g. `EST5EDT,M3.2.0/2:00:00,M11.1.0/2:00:00`.
///
/// Only call this once time has been synchronized.
pub fn set_timezone(tz: &str) {
    info!("Setting timezone: {}", tz);
    std::env::set_var("TZ", tz);
    unsafe { tzset() };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hour_zero_is_not_plausible() {
        assert!(!WallClockSample::new(0, 59, 59).is_plausible());
        assert!(WallClockSample::new(1, 0, 0).is_plausible());
        assert!(WallClockSample::new(23, 0, 0).is_plausible());
    }

    #[test]
    fn formats_as_hh_mm_ss() {
        assert_eq!(WallClockSample::new(7, 5, 9).to_string(), "07:05:09");
    }

    #[test]
    fn clamps_out_of_range_fields() {
        assert_eq!(clamp_field(-1, 23), 0);
        assert_eq!(clamp_field(61, 60), 60);
        assert_eq!(clamp_field(12, 23), 12);
    }

    #[test]
    fn system_clock_returns_valid_fields() {
        let s = SystemClock.now();
        assert!(s.hour <= 23);
        assert!(s.minute <= 59);
        assert!(s.second <= 60);
    }
}
