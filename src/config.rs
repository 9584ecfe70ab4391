#![cfg_attr(not(target_os = "espidf"), allow(dead_code))]

#[cfg(target_os = "espidf")]
use anyhow::Result;
#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspNvs, NvsDefault};
#[cfg(target_os = "espidf")]
use log::info;

use crate::wifi::Credentials;

pub const NS: &str = "clock_cfg";

const KEY_WIFI_SSID: &str = "wifi_ssid";
const KEY_WIFI_PASS: &str = "wifi_pass";
const KEY_WIFI_IDENTITY: &str = "wifi_id";
const KEY_WIFI_USERNAME: &str = "wifi_user";
const KEY_WIFI_ENTERPRISE: &str = "wifi_eap";
const KEY_WIFI_RETRIES: &str = "wifi_retries";
const KEY_SNTP_RETRIES: &str = "sntp_retries";
const KEY_SNTP_SERVER: &str = "sntp_server";
const KEY_TIMEZONE: &str = "timezone";
const KEY_CLK_PIN: &str = "clk_pin";
const KEY_DIO_PIN: &str = "dio_pin";
const KEY_DEBUG_MODE: &str = "debug_mode";

const DEFAULT_WIFI_SSID: &str = match option_env!("LOCAL_WIFI_SSID") {
    Some(v) => v,
    None => "YOUR_WIFI_SSID",
};
const DEFAULT_WIFI_PASS: &str = match option_env!("LOCAL_WIFI_PASS") {
    Some(v) => v,
    None => "",
};
const DEFAULT_WIFI_IDENTITY: &str = match option_env!("LOCAL_WIFI_IDENTITY") {
    Some(v) => v,
    None => "",
};
const DEFAULT_WIFI_USERNAME: &str = match option_env!("LOCAL_WIFI_USERNAME") {
    Some(v) => v,
    None => "",
};
pub const DEFAULT_WIFI_RETRIES: u8 = 5;
pub const DEFAULT_SNTP_RETRIES: u8 = 5;
pub const DEFAULT_SNTP_SERVER: &str = "pool.ntp.org";
pub const DEFAULT_TIMEZONE: &str = "EST5EDT,M3.2.0/2:00:00,M11.1.0/2:00:00";
pub const DEFAULT_CLK_PIN: u8 = 22;
pub const DEFAULT_DIO_PIN: u8 = 21;
const DEFAULT_DEBUG_MODE: bool = cfg!(feature = "debug-mode");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub wifi_identity: String,
    pub wifi_username: String,
    pub wifi_enterprise: bool,
    pub wifi_retries: u8,
    pub sntp_retries: u8,
    pub sntp_server: String,
    pub timezone: String,
    pub clk_pin: u8,
    pub dio_pin: u8,
    /// Keep running unsynced instead of deep-sleeping when SNTP fails.
    pub debug_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wifi_ssid: DEFAULT_WIFI_SSID.to_string(),
            wifi_pass: DEFAULT_WIFI_PASS.to_string(),
            wifi_identity: DEFAULT_WIFI_IDENTITY.to_string(),
            wifi_username: DEFAULT_WIFI_USERNAME.to_string(),
            wifi_enterprise: false,
            wifi_retries: DEFAULT_WIFI_RETRIES,
            sntp_retries: DEFAULT_SNTP_RETRIES,
            sntp_server: DEFAULT_SNTP_SERVER.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            clk_pin: DEFAULT_CLK_PIN,
            dio_pin: DEFAULT_DIO_PIN,
            debug_mode: DEFAULT_DEBUG_MODE,
        }
    }
}

impl Config {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            ssid: self.wifi_ssid.clone(),
            password: self.wifi_pass.clone(),
            identity: self.wifi_identity.clone(),
            username: self.wifi_username.clone(),
            enterprise: self.wifi_enterprise,
        }
    }

    /// One line per setting for `status`, with secrets reduced to a length.
    pub fn summary(&self) -> Vec<String> {
        let ssid = if self.wifi_ssid.is_empty() {
            "not configured"
        } else {
            self.wifi_ssid.as_str()
        };
        vec![
            format!("wifi: {}", ssid),
            format!("wifi pass: <{} chars>", self.wifi_pass.len()),
            format!(
                "wifi eap: {} (identity <{} chars>, user <{} chars>)",
                if self.wifi_enterprise { "on" } else { "off" },
                self.wifi_identity.len(),
                self.wifi_username.len()
            ),
            format!("retries: wifi={} sntp={}", self.wifi_retries, self.sntp_retries),
            format!("sntp server: {}", self.sntp_server),
            format!("timezone: {}", self.timezone),
            format!("pins: clk={} dio={}", self.clk_pin, self.dio_pin),
            format!("debug mode: {}", if self.debug_mode { "on" } else { "off" }),
        ]
    }
}

/// Read a string from NVS, returning None if the key is absent or on error.
#[cfg(target_os = "espidf")]
fn nvs_get_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<String> {
    let len = match nvs.str_len(key) {
        Ok(Some(len)) => len,
        _ => return None,
    };

    let mut buf = vec![0u8; len];
    match nvs.get_str(key, &mut buf) {
        Ok(Some(val)) => Some(val.trim_end_matches('\0').to_string()),
        _ => None,
    }
}

#[cfg(target_os = "espidf")]
fn nvs_get_u8(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<u8> {
    nvs.get_u8(key).unwrap_or(None)
}

#[cfg(target_os = "espidf")]
impl Config {
    /// Load configuration from NVS, falling back to defaults for any missing
    /// keys.
    pub fn load(nvs: &EspNvs<NvsDefault>) -> Config {
        let d = Config::default();

        let wifi_ssid = nvs_get_str(nvs, KEY_WIFI_SSID).unwrap_or(d.wifi_ssid);
        info!("NVS wifi_ssid = {:?}", wifi_ssid);
        let wifi_pass = nvs_get_str(nvs, KEY_WIFI_PASS).unwrap_or(d.wifi_pass);
        info!("NVS wifi_pass = <{} chars>", wifi_pass.len());
        let wifi_identity = nvs_get_str(nvs, KEY_WIFI_IDENTITY).unwrap_or(d.wifi_identity);
        info!("NVS wifi_id = <{} chars>", wifi_identity.len());
        let wifi_username = nvs_get_str(nvs, KEY_WIFI_USERNAME).unwrap_or(d.wifi_username);
        info!("NVS wifi_user = <{} chars>", wifi_username.len());
        let wifi_enterprise = nvs_get_u8(nvs, KEY_WIFI_ENTERPRISE)
            .map(|v| v != 0)
            .unwrap_or(d.wifi_enterprise);
        info!("NVS wifi_eap = {}", wifi_enterprise);

        let wifi_retries = nvs_get_u8(nvs, KEY_WIFI_RETRIES).unwrap_or(d.wifi_retries);
        let sntp_retries = nvs_get_u8(nvs, KEY_SNTP_RETRIES).unwrap_or(d.sntp_retries);
        info!("NVS retries = wifi {} / sntp {}", wifi_retries, sntp_retries);

        let sntp_server = nvs_get_str(nvs, KEY_SNTP_SERVER)
            .filter(|s| !s.is_empty())
            .unwrap_or(d.sntp_server);
        info!("NVS sntp_server = {:?}", sntp_server);
        let timezone = nvs_get_str(nvs, KEY_TIMEZONE)
            .filter(|s| !s.is_empty())
            .unwrap_or(d.timezone);
        info!("NVS timezone = {:?}", timezone);

        let clk_pin = nvs_get_u8(nvs, KEY_CLK_PIN).unwrap_or(d.clk_pin);
        let dio_pin = nvs_get_u8(nvs, KEY_DIO_PIN).unwrap_or(d.dio_pin);
        info!("NVS pins = clk {} / dio {}", clk_pin, dio_pin);

        let debug_mode = nvs_get_u8(nvs, KEY_DEBUG_MODE)
            .map(|v| v != 0)
            .unwrap_or(d.debug_mode);
        info!("NVS debug_mode = {}", debug_mode);

        Config {
            wifi_ssid,
            wifi_pass,
            wifi_identity,
            wifi_username,
            wifi_enterprise,
            wifi_retries,
            sntp_retries,
            sntp_server,
            timezone,
            clk_pin,
            dio_pin,
            debug_mode,
        }
    }

    pub fn save_wifi(nvs: &mut EspNvs<NvsDefault>, ssid: &str, pass: &str) -> Result<()> {
        nvs.set_str(KEY_WIFI_SSID, ssid)?;
        nvs.set_str(KEY_WIFI_PASS, pass)?;
        info!("NVS saved wifi_ssid={:?}", ssid);
        Ok(())
    }

    pub fn save_identity(nvs: &mut EspNvs<NvsDefault>, identity: &str) -> Result<()> {
        nvs.set_str(KEY_WIFI_IDENTITY, identity)?;
        info!("NVS saved wifi_id=<{} chars>", identity.len());
        Ok(())
    }

    pub fn save_username(nvs: &mut EspNvs<NvsDefault>, username: &str) -> Result<()> {
        nvs.set_str(KEY_WIFI_USERNAME, username)?;
        info!("NVS saved wifi_user=<{} chars>", username.len());
        Ok(())
    }

    pub fn save_enterprise(nvs: &mut EspNvs<NvsDefault>, enabled: bool) -> Result<()> {
        nvs.set_u8(KEY_WIFI_ENTERPRISE, u8::from(enabled))?;
        info!("NVS saved wifi_eap={}", enabled);
        Ok(())
    }

    pub fn save_wifi_retries(nvs: &mut EspNvs<NvsDefault>, retries: u8) -> Result<()> {
        nvs.set_u8(KEY_WIFI_RETRIES, retries)?;
        info!("NVS saved wifi_retries={}", retries);
        Ok(())
    }

    pub fn save_sntp_retries(nvs: &mut EspNvs<NvsDefault>, retries: u8) -> Result<()> {
        nvs.set_u8(KEY_SNTP_RETRIES, retries)?;
        info!("NVS saved sntp_retries={}", retries);
        Ok(())
    }

    pub fn save_sntp_server(nvs: &mut EspNvs<NvsDefault>, server: &str) -> Result<()> {
        nvs.set_str(KEY_SNTP_SERVER, server)?;
        info!("NVS saved sntp_server={:?}", server);
        Ok(())
    }

    pub fn save_timezone(nvs: &mut EspNvs<NvsDefault>, tz: &str) -> Result<()> {
        nvs.set_str(KEY_TIMEZONE, tz)?;
        info!("NVS saved timezone={:?}", tz);
        Ok(())
    }

    pub fn save_pins(nvs: &mut EspNvs<NvsDefault>, clk: u8, dio: u8) -> Result<()> {
        nvs.set_u8(KEY_CLK_PIN, clk)?;
        nvs.set_u8(KEY_DIO_PIN, dio)?;
        info!("NVS saved pins clk={} dio={}", clk, dio);
        Ok(())
    }

    pub fn save_debug_mode(nvs: &mut EspNvs<NvsDefault>, enabled: bool) -> Result<()> {
        nvs.set_u8(KEY_DEBUG_MODE, u8::from(enabled))?;
        info!("NVS saved debug_mode={}", enabled);
        Ok(())
    }
}
