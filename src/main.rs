#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    device::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!(
        "wifi-clock only runs on ESP-IDF targets; `cargo test` exercises the logic on the host"
    );
}

#[cfg(target_os = "espidf")]
mod device {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::Result;
    use esp_idf_hal::delay::Ets;
    use esp_idf_hal::gpio::{AnyIOPin, InputOutput, Output, PinDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
    use log::{error, info, warn};

    use wifi_clock::clock::{self, SystemClock};
    use wifi_clock::config::{self, Config};
    use wifi_clock::console;
    use wifi_clock::display;
    use wifi_clock::error::ClockError;
    use wifi_clock::power::DeepSleep;
    use wifi_clock::sntp::SntpSource;
    use wifi_clock::station::{EspHeapCheck, StationDriver};
    use wifi_clock::time_sync::{sync_or_suspend, SyncOutcome, TimeSyncSupervisor};
    use wifi_clock::tm1637::Tm1637;
    use wifi_clock::web;
    use wifi_clock::wifi::ConnectivitySupervisor;

    type ClockDisplay = Tm1637<
        PinDriver<'static, AnyIOPin, Output>,
        PinDriver<'static, AnyIOPin, InputOutput>,
        Ets,
    >;

    fn init_tm1637(clk: AnyIOPin, dio: AnyIOPin) -> wifi_clock::Result<ClockDisplay> {
        let gpio_err = |e: esp_idf_sys::EspError| ClockError::PeripheralInitFailure {
            peripheral: "TM1637",
            reason: format!("gpio: {}", e),
        };
        let clk = PinDriver::output(clk).map_err(gpio_err)?;
        let dio = PinDriver::input_output_od(dio).map_err(gpio_err)?;
        Tm1637::init(clk, dio, Ets)
    }

    pub fn run() -> Result<()> {
        // ── 1. Runtime patches + logger ──
        esp_idf_sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
        info!("wifi-clock {} starting", env!("CARGO_PKG_VERSION"));

        // ── 2. Peripherals ──
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs_partition = EspDefaultNvsPartition::take()?;

        // ── 3. NVS config ──
        let nvs = EspNvs::new(nvs_partition.clone(), config::NS, true)?;
        let cfg = Config::load(&nvs);
        for line in cfg.summary() {
            info!("{}", line);
        }

        // ── 4. WiFi station + console ──
        let (station, events) = StationDriver::new(
            peripherals.modem,
            sysloop.clone(),
            nvs_partition,
            &cfg.credentials(),
        )?;
        let mut supervisor =
            ConnectivitySupervisor::new(station, events, EspHeapCheck, cfg.wifi_retries);

        console::spawn_console(
            Arc::new(Mutex::new(nvs)),
            Arc::new(Mutex::new(cfg.clone())),
            supervisor.signal(),
        )?;

        // ── 5. Connect ──
        let connected = if cfg.wifi_ssid.is_empty() {
            warn!("No WiFi SSID configured (use console: wifi set <ssid> [pass])");
            false
        } else {
            info!("Connecting to WiFi '{}'...", cfg.wifi_ssid);
            match supervisor.connect() {
                Ok(c) => {
                    info!("WiFi up at {} after {} connect attempt(s)", c.ip, c.attempts);
                    true
                }
                Err(e) if e.is_fatal() => {
                    error!("{}; aborting", e);
                    std::process::abort();
                }
                Err(e) => {
                    warn!("{}; continuing without network", e);
                    false
                }
            }
        };

        // ── 6. SNTP ──
        let _sntp = if connected {
            let mut sync = TimeSyncSupervisor::new(
                SntpSource::new(),
                SystemClock,
                &cfg.sntp_server,
                cfg.sntp_retries,
            );
            match sync_or_suspend(&mut sync, cfg.debug_mode, &mut DeepSleep) {
                Ok(SyncOutcome::Synced(_)) => clock::set_timezone(&cfg.timezone),
                Ok(_) => warn!("Running with unsynced time"),
                Err(e) => warn!("SNTP failed: {}", e),
            }
            Some(sync.into_source())
        } else {
            None
        };

        // ── 7. HTTP ──
        let _server = match web::start_server() {
            Ok(server) => Some(server),
            Err(e) => {
                warn!("HTTP server failed to start: {}", e);
                None
            }
        };

        // ── 8. Display task ──
        // SAFETY: the pin numbers come from config and nothing else drives them.
        let clk = unsafe { AnyIOPin::new(cfg.clk_pin.into()) };
        let dio = unsafe { AnyIOPin::new(cfg.dio_pin.into()) };
        display::spawn(SystemClock, move || init_tm1637(clk, dio))?;

        // WiFi, SNTP and the server stop when dropped; keep them here.
        info!("Boot complete");
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }
}
