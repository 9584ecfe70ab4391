use std::time::Duration;

use log::{info, warn};

use crate::time_sync::LowPower;

/// Timer-woken deep sleep. The chip resets on wake, so `suspend` never
/// returns.
pub struct DeepSleep;

impl LowPower for DeepSleep {
    fn suspend(&mut self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let rc = unsafe { esp_idf_sys::esp_sleep_enable_timer_wakeup(us) };
        if rc != esp_idf_sys::ESP_OK {
            warn!("Deep sleep timer setup failed (err {})", rc);
        }
        info!("Entering deep sleep for {}s", duration.as_secs());
        unsafe { esp_idf_sys::esp_deep_sleep_start() }
    }
}
