use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::chatty;
use crate::clock::{Clock, WallClockSample};
use crate::debug_flags::DEBUG_SNTP;
use crate::error::{ClockError, Result};
use crate::retry::RetryCounter;

pub const SNTP_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Deep sleep length after an unsuccessful sync; the device reboots on wake.
pub const SUSPEND_DURATION: Duration = Duration::from_secs(10 * 60);

/// What a time source knows about its own progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Completed,
    InProgress,
    /// No completion report available; fall back to checking the clock.
    Unsupported,
}

/// An NTP client the supervisor can start and poll.
pub trait TimeSource {
    /// Configure poll mode against `server` and begin synchronizing.
    fn start(&mut self, server: &str) -> Result<()>;
    fn status(&self) -> SyncStatus;
}

/// Server table for an SNTP client with `N` slots: the configured server
/// first, every other slot left empty.
pub fn server_slots<const N: usize>(server: &str) -> [&str; N] {
    let mut slots = [""; N];
    if let Some(first) = slots.first_mut() {
        *first = server;
    }
    slots
}

/// Timed low-power halt. On hardware this does not return: the chip reboots
/// when the timer fires.
pub trait LowPower {
    fn suspend(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced(WallClockSample),
    /// Sync failed and debug mode kept the device running.
    Unsynced,
    /// Sync failed and the device was put to sleep.
    Suspended,
}

pub struct TimeSyncSupervisor<T, C> {
    source: T,
    clock: C,
    server: String,
    retries: RetryCounter,
    interval: Duration,
    reads: u8,
}

impl<T: TimeSource, C: Clock> TimeSyncSupervisor<T, C> {
    pub fn new(source: T, clock: C, server: &str, max_attempts: u8) -> Self {
        Self {
            source,
            clock,
            server: server.to_string(),
            retries: RetryCounter::new(max_attempts),
            interval: SNTP_POLL_INTERVAL,
            reads: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Clock reads made by the last [`sync_time`](Self::sync_time).
    pub fn reads(&self) -> u8 {
        self.reads
    }

    pub fn source(&self) -> &T {
        &self.source
    }

    /// Give the source back so it keeps re-syncing in the background.
    pub fn into_source(self) -> T {
        self.source
    }

    /// Start the time source and poll until it reports a valid time.
    ///
    /// Makes at most `max_attempts` clock reads, waiting the poll interval
    /// between them. Leaves the timezone alone.
    pub fn sync_time(&mut self) -> Result<WallClockSample> {
        self.retries.reset();
        self.reads = 0;

        self.source.start(&self.server)?;
        info!("SNTP started with {}", self.server);

        while !self.retries.is_exhausted() {
            let sample = self.clock.now();
            self.reads += 1;

            if self.is_synced(&sample) {
                info!("SNTP set to {}", sample);
                return Ok(sample);
            }

            self.retries.record_failure();
            if self.retries.is_exhausted() {
                break;
            }
            chatty!(
                DEBUG_SNTP,
                "Waiting for SNTP sync... ({}/{}, clock reads {})",
                self.retries.attempt(),
                self.retries.max(),
                sample
            );
            thread::sleep(self.interval);
        }

        warn!("SNTP sync failed after {} reads", self.reads);
        Err(ClockError::TimeSyncExhausted {
            attempts: self.retries.max(),
        })
    }

    fn is_synced(&self, sample: &WallClockSample) -> bool {
        match self.source.status() {
            SyncStatus::Completed => true,
            SyncStatus::InProgress => false,
            SyncStatus::Unsupported => sample.is_plausible(),
        }
    }
}

/// Run a sync and apply the failure policy.
///
/// Outside debug mode an exhausted sync suspends the device for
/// [`SUSPEND_DURATION`]. Other errors are returned unchanged.
pub fn sync_or_suspend<T, C, P>(
    supervisor: &mut TimeSyncSupervisor<T, C>,
    debug_mode: bool,
    power: &mut P,
) -> Result<SyncOutcome>
where
    T: TimeSource,
    C: Clock,
    P: LowPower,
{
    match supervisor.sync_time() {
        Ok(sample) => Ok(SyncOutcome::Synced(sample)),
        Err(e @ ClockError::TimeSyncExhausted { .. }) => {
            if debug_mode {
                warn!("{}; debug mode, continuing with unsynced time", e);
                Ok(SyncOutcome::Unsynced)
            } else {
                warn!("{}; sleeping for {} minutes", e, SUSPEND_DURATION.as_secs() / 60);
                power.suspend(SUSPEND_DURATION);
                Ok(SyncOutcome::Suspended)
            }
        }
        Err(e) => Err(e),
    }
}
