use esp_idf_svc::sntp::{self, EspSntp, OperatingMode, SntpConf, SyncMode};
use log::info;

use crate::error::{ClockError, Result};
use crate::time_sync::{server_slots, SyncStatus, TimeSource};

/// The ESP-IDF SNTP client. Must stay alive for periodic re-sync.
#[derive(Default)]
pub struct SntpSource {
    sntp: Option<EspSntp<'static>>,
}

impl SntpSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for SntpSource {
    fn start(&mut self, server: &str) -> Result<()> {
        // Only the first slot carries a server.
        let conf = SntpConf {
            servers: server_slots(server),
            sync_mode: SyncMode::Immediate,
            operating_mode: OperatingMode::Poll,
        };

        // Drop any previous client first; lwIP only allows one.
        self.sntp = None;
        let sntp = EspSntp::new_with_callback(&conf, |_| {
            info!("SNTP sync callback triggered");
        })
        .map_err(|e| ClockError::Network(format!("sntp init: {}", e)))?;
        self.sntp = Some(sntp);
        Ok(())
    }

    fn status(&self) -> SyncStatus {
        match self.sntp.as_ref().map(|s| s.get_sync_status()) {
            Some(sntp::SyncStatus::Completed) => SyncStatus::Completed,
            Some(_) => SyncStatus::InProgress,
            None => SyncStatus::Unsupported,
        }
    }
}
