use core::fmt;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::chatty;
use crate::clock::{Clock, WallClockSample};
use crate::debug_flags::DEBUG_DISPLAY;
use crate::error::Result;

pub const FULL_BRIGHTNESS: u8 = 0xFF;
const DISPLAY_TASK_STACK: usize = 4096;

/// What gets written to the 4-digit display in one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayFrame {
    /// `hour * 100 + minute`, e.g. 1342 for 13:42.
    pub value: u16,
    pub colon: bool,
    pub brightness: u8,
}

impl DisplayFrame {
    pub fn from_sample(sample: &WallClockSample) -> Self {
        Self {
            value: u16::from(sample.hour) * 100 + u16::from(sample.minute),
            colon: true,
            brightness: FULL_BRIGHTNESS,
        }
    }
}

/// A numeric 4-digit display.
pub trait SegmentDisplay {
    type Error: fmt::Debug;

    fn set_number(&mut self, value: u16, colon: bool, brightness: u8)
        -> core::result::Result<(), Self::Error>;
}

/// Time until the top of the next minute.
pub fn refresh_delay(sample: &WallClockSample) -> Duration {
    // Leap second 60 waits one second like :59 does.
    let second = u64::from(sample.second.min(59));
    Duration::from_secs(60 - second)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub frame: DisplayFrame,
    pub delay: Duration,
}

/// Redraws the clock once a minute, re-aligning to the minute boundary on
/// every cycle so rendering time never accumulates as drift.
pub struct RefreshLoop<C, D> {
    clock: C,
    display: D,
}

impl<C: Clock, D: SegmentDisplay> RefreshLoop<C, D> {
    pub fn new(clock: C, display: D) -> Self {
        Self { clock, display }
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Render the current time once and return how long to wait.
    pub fn tick(&mut self) -> Tick {
        let sample = self.clock.now();
        let frame = DisplayFrame::from_sample(&sample);

        if let Err(e) = self
            .display
            .set_number(frame.value, frame.colon, frame.brightness)
        {
            warn!("Display write failed: {:?}", e);
        }

        let delay = refresh_delay(&sample);
        chatty!(
            DEBUG_DISPLAY,
            "Displayed time: {}:{:02}, updating clock in {} seconds",
            sample.hour,
            sample.minute,
            delay.as_secs()
        );
        Tick { frame, delay }
    }

    pub fn run(mut self) -> ! {
        loop {
            let tick = self.tick();
            thread::sleep(tick.delay);
        }
    }
}

/// Start the refresh loop on its own thread.
///
/// `init` runs on that thread. If it fails the thread logs and exits; the
/// display is not retried.
pub fn spawn<C, D, F>(clock: C, init: F) -> std::io::Result<JoinHandle<()>>
where
    C: Clock + Send + 'static,
    D: SegmentDisplay + 'static,
    F: FnOnce() -> Result<D> + Send + 'static,
{
    thread::Builder::new()
        .name("display".into())
        .stack_size(DISPLAY_TASK_STACK)
        .spawn(move || {
            let display = match init() {
                Ok(display) => display,
                Err(e) => {
                    error!("Failed to init TM1637: {}", e);
                    return;
                }
            };
            info!("Successfully inited TM1637");
            RefreshLoop::new(clock, display).run()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClockError;

    struct FixedClock(WallClockSample);

    impl Clock for FixedClock {
        fn now(&self) -> WallClockSample {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        writes: Vec<(u16, bool, u8)>,
        fail: bool,
    }

    impl SegmentDisplay for RecordingDisplay {
        type Error = &'static str;

        fn set_number(
            &mut self,
            value: u16,
            colon: bool,
            brightness: u8,
        ) -> core::result::Result<(), Self::Error> {
            self.writes.push((value, colon, brightness));
            if self.fail {
                Err("bus fault")
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn delay_lands_on_the_next_minute() {
        for s in 0..=59u8 {
            let delay = refresh_delay(&WallClockSample::new(12, 0, s));
            assert_eq!(delay, Duration::from_secs(60 - u64::from(s)));
        }
        assert_eq!(refresh_delay(&WallClockSample::new(0, 0, 0)), Duration::from_secs(60));
    }

    #[test]
    fn leap_second_never_busy_loops() {
        assert_eq!(refresh_delay(&WallClockSample::new(23, 59, 60)), Duration::from_secs(1));
    }

    #[test]
    fn frame_packs_hours_and_minutes() {
        let frame = DisplayFrame::from_sample(&WallClockSample::new(13, 42, 7));
        assert_eq!(
            frame,
            DisplayFrame {
                value: 1342,
                colon: true,
                brightness: 0xFF
            }
        );
        assert_eq!(DisplayFrame::from_sample(&WallClockSample::new(0, 5, 0)).value, 5);
        assert_eq!(DisplayFrame::from_sample(&WallClockSample::new(23, 59, 0)).value, 2359);
    }

    #[test]
    fn repeated_ticks_without_time_passing_are_identical() {
        let clock = FixedClock(WallClockSample::new(8, 15, 20));
        let mut refresh = RefreshLoop::new(clock, RecordingDisplay::default());
        let first = refresh.tick();
        let second = refresh.tick();
        assert_eq!(first, second);
        assert_eq!(first.delay, Duration::from_secs(40));
        assert_eq!(refresh.display().writes, vec![(815, true, 0xFF); 2]);
    }

    #[test]
    fn write_errors_do_not_stop_the_loop() {
        let clock = FixedClock(WallClockSample::new(9, 0, 59));
        let display = RecordingDisplay {
            fail: true,
            ..RecordingDisplay::default()
        };
        let mut refresh = RefreshLoop::new(clock, display);
        assert_eq!(refresh.tick().delay, Duration::from_secs(1));
        assert_eq!(refresh.tick().frame.value, 900);
        assert_eq!(refresh.display().writes.len(), 2);
    }

    #[test]
    fn init_failure_ends_the_task() {
        let clock = FixedClock(WallClockSample::new(1, 2, 3));
        let handle = spawn(clock, || -> Result<RecordingDisplay> {
            Err(ClockError::PeripheralInitFailure {
                peripheral: "TM1637",
                reason: "no ACK".into(),
            })
        })
        .unwrap();
        assert!(handle.join().is_ok());
    }
}
