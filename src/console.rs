//! Serial console for inspecting and editing the stored configuration.
//!
//! Parsing and the in-memory edits are plain Rust; only the reader thread
//! and NVS persistence are tied to the device.

use log::{info, warn};

use crate::config::Config;
use crate::debug_flags;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    Status,
    WifiShow,
    WifiSet { ssid: String, pass: String },
    WifiClear,
    EapShow,
    EapEnable(bool),
    EapIdentity(String),
    EapUser(String),
    RetriesShow,
    WifiRetries(u8),
    SntpRetries(u8),
    TzShow,
    TzSet(String),
    SntpServer(String),
    Pins { clk: u8, dio: u8 },
    DebugMode(bool),
    DebugShow,
    /// Toggle one module's debug flag, or `all`.
    DebugToggle(String),
    Reboot,
    Usage(&'static str),
    Unknown(String),
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"').trim_matches('\'')
}

fn parse_switch(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "enable" | "enabled" => Some(true),
        "off" | "0" | "false" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}

pub fn parse_command(line: &str) -> Command {
    let clean = line.trim().trim_end_matches('\\');
    if clean.is_empty() {
        return Command::Empty;
    }
    let mut parts = clean.splitn(3, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let sub = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match cmd {
        "help" | "?" => Command::Help,
        "status" => Command::Status,
        "reboot" => Command::Reboot,
        "wifi" => match sub {
            "" | "show" => Command::WifiShow,
            "set" => {
                let (ssid, pass) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let ssid = unquote(ssid);
                if ssid.is_empty() {
                    return Command::Usage("wifi set <ssid> [password]");
                }
                Command::WifiSet {
                    ssid: ssid.to_string(),
                    pass: unquote(pass).to_string(),
                }
            }
            "clear" => Command::WifiClear,
            _ => Command::Usage("wifi show|set <ssid> [password]|clear"),
        },
        "eap" => match sub {
            "" | "show" => Command::EapShow,
            "identity" | "user" if unquote(rest).is_empty() => {
                Command::Usage("eap identity <id> | eap user <name>")
            }
            "identity" => Command::EapIdentity(unquote(rest).to_string()),
            "user" => Command::EapUser(unquote(rest).to_string()),
            other => match parse_switch(other) {
                Some(on) => Command::EapEnable(on),
                None => Command::Usage("eap show|on|off|identity <id>|user <name>"),
            },
        },
        "retries" => match (sub, rest.parse::<u8>()) {
            ("" | "show", _) => Command::RetriesShow,
            ("wifi", Ok(n)) => Command::WifiRetries(n),
            ("sntp", Ok(n)) => Command::SntpRetries(n),
            _ => Command::Usage("retries show|wifi <n>|sntp <n>  (n = 0..255)"),
        },
        "tz" => match sub {
            "" | "show" => Command::TzShow,
            "set" if !unquote(rest).is_empty() => Command::TzSet(unquote(rest).to_string()),
            _ => Command::Usage("tz show|set <posix-tz-rule>"),
        },
        "sntp" => match sub {
            "server" if !unquote(rest).is_empty() => {
                Command::SntpServer(unquote(rest).to_string())
            }
            _ => Command::Usage("sntp server <host>"),
        },
        "pins" => match (sub.parse::<u8>(), rest.parse::<u8>()) {
            (Ok(clk), Ok(dio)) if clk != dio => Command::Pins { clk, dio },
            _ => Command::Usage("pins <clk-gpio> <dio-gpio>"),
        },
        "debug-mode" => match parse_switch(sub) {
            Some(on) => Command::DebugMode(on),
            None => Command::Usage("debug-mode on|off"),
        },
        "debug" => match sub {
            "" | "show" => Command::DebugShow,
            "all" => Command::DebugToggle("all".into()),
            module if debug_flags::by_name(module).is_some() => {
                Command::DebugToggle(module.to_string())
            }
            _ => Command::Usage("debug <wifi|sntp|display|http|all> | debug show"),
        },
        other => Command::Unknown(other.to_string()),
    }
}

impl Command {
    /// Apply a setting change to `cfg`. Returns false for commands that do
    /// not edit the configuration.
    pub fn apply(&self, cfg: &mut Config) -> bool {
        match self {
            Command::WifiSet { ssid, pass } => {
                cfg.wifi_ssid = ssid.clone();
                cfg.wifi_pass = pass.clone();
            }
            Command::WifiClear => {
                cfg.wifi_ssid.clear();
                cfg.wifi_pass.clear();
            }
            Command::EapEnable(on) => cfg.wifi_enterprise = *on,
            Command::EapIdentity(id) => cfg.wifi_identity = id.clone(),
            Command::EapUser(user) => cfg.wifi_username = user.clone(),
            Command::WifiRetries(n) => cfg.wifi_retries = *n,
            Command::SntpRetries(n) => cfg.sntp_retries = *n,
            Command::TzSet(tz) => cfg.timezone = tz.clone(),
            Command::SntpServer(host) => cfg.sntp_server = host.clone(),
            Command::Pins { clk, dio } => {
                cfg.clk_pin = *clk;
                cfg.dio_pin = *dio;
            }
            Command::DebugMode(on) => cfg.debug_mode = *on,
            _ => return false,
        }
        true
    }
}

/// Flip a module flag, or all of them together: any flag off turns them all
/// on, otherwise they all go off. Returns the new state.
pub fn toggle_debug(module: &str) -> Option<bool> {
    if module == "all" {
        let any_off = debug_flags::all().iter().any(|f| !debug_flags::is_on(f));
        for flag in debug_flags::all() {
            debug_flags::set(flag, any_off);
        }
        return Some(any_off);
    }
    debug_flags::by_name(module).map(debug_flags::toggle)
}

pub fn print_help() {
    info!("commands:");
    info!("  status                     - show config and connection state");
    info!("  wifi show                  - show Wi-Fi config");
    info!("  wifi set <ssid> [pass]     - set Wi-Fi credentials");
    info!("  wifi clear                 - clear Wi-Fi credentials");
    info!("  eap show|on|off            - WPA2-Enterprise mode");
    info!("  eap identity <id>          - set EAP identity");
    info!("  eap user <name>            - set EAP username");
    info!("  retries show               - show retry ceilings");
    info!("  retries wifi|sntp <n>      - set a retry ceiling");
    info!("  tz show|set <rule>         - POSIX timezone rule");
    info!("  sntp server <host>         - set NTP server");
    info!("  pins <clk> <dio>           - TM1637 GPIO numbers");
    info!("  debug-mode on|off          - stay awake when SNTP fails");
    info!("  debug <module>             - toggle debug for module");
    info!("    modules: wifi, sntp, display, http, all");
    info!("  debug show                 - show debug flag status");
    info!("  reboot                     - reboot device");
    info!("settings take effect after reboot");
}

/// Accumulates raw serial bytes into lines, handling backspace and dropping
/// ANSI escape sequences from terminal arrow keys.
///
/// Bytes are kept as-is and decoded as UTF-8 once the line ends, so
/// non-ASCII SSIDs and passwords reach NVS unchanged. Lines that are not
/// valid UTF-8 are discarded with a warning.
#[derive(Debug, Default)]
pub struct LineEditor {
    line: Vec<u8>,
    in_escape: bool,
}

impl LineEditor {
    pub fn push(&mut self, ch: u8) -> Option<String> {
        if self.in_escape {
            if ch.is_ascii_alphabetic() || ch == b'~' {
                self.in_escape = false;
            }
            return None;
        }
        match ch {
            0x1b => self.in_escape = true,
            b'\n' | b'\r' => {
                if !self.line.is_empty() {
                    return self.finish();
                }
            }
            0x7f | 0x08 => self.erase_char(),
            c if c >= 0x20 => self.line.push(c),
            _ => {}
        }
        None
    }

    fn finish(&mut self) -> Option<String> {
        match String::from_utf8(std::mem::take(&mut self.line)) {
            Ok(line) => Some(line),
            Err(e) => {
                warn!("console: dropped line with invalid UTF-8 ({})", e.utf8_error());
                None
            }
        }
    }

    /// Remove the last character, including all bytes of a multi-byte one.
    fn erase_char(&mut self) {
        while let Some(b) = self.line.pop() {
            if b & 0xC0 != 0x80 {
                break;
            }
        }
    }
}

#[cfg(target_os = "espidf")]
pub use device::spawn_console;

#[cfg(target_os = "espidf")]
mod device {
    use std::io::{self, Read};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    use anyhow::Result;
    use esp_idf_svc::nvs::{EspNvs, NvsDefault};
    use log::{info, warn};

    use super::{parse_command, print_help, toggle_debug, Command, LineEditor};
    use crate::config::Config;
    use crate::debug_flags;
    use crate::wifi::ConnectionSignal;

    const CONSOLE_TASK_STACK: usize = 8192;

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spawn_console(
        nvs: Arc<Mutex<EspNvs<NvsDefault>>>,
        config: Arc<Mutex<Config>>,
        signal: ConnectionSignal,
    ) -> Result<()> {
        std::thread::Builder::new()
            .name("console".into())
            .stack_size(CONSOLE_TASK_STACK)
            .spawn(move || {
                info!("console: ready (type 'help')");
                let stdin = io::stdin();
                let mut reader = stdin.lock();
                let mut editor = LineEditor::default();
                let mut buf = [0u8; 1];
                loop {
                    match reader.read(&mut buf) {
                        Ok(1) => {
                            if let Some(line) = editor.push(buf[0]) {
                                info!("> {}", line);
                                if let Err(e) = process_line(&line, &nvs, &config, &signal) {
                                    warn!("console: error: {}", e);
                                }
                            }
                        }
                        Ok(_) => std::thread::sleep(Duration::from_millis(50)),
                        Err(_) => std::thread::sleep(Duration::from_millis(100)),
                    }
                }
            })?;
        Ok(())
    }

    fn process_line(
        line: &str,
        nvs: &Arc<Mutex<EspNvs<NvsDefault>>>,
        config: &Arc<Mutex<Config>>,
        signal: &ConnectionSignal,
    ) -> Result<()> {
        let cmd = parse_command(line);
        match &cmd {
            Command::Empty => {}
            Command::Help => print_help(),
            Command::Status => {
                for l in lock(config).summary() {
                    info!("{}", l);
                }
                info!("connected: {}", if signal.is_set() { "yes" } else { "no" });
                let heap_kb = unsafe { esp_idf_sys::esp_get_free_heap_size() } / 1024;
                info!("free heap: {} KB", heap_kb);
                info!("debug: {}", debug_flags::status_line());
            }
            Command::WifiShow => {
                let cfg = lock(config);
                info!("wifi ssid: {}", cfg.wifi_ssid);
                let pass_len = cfg.wifi_pass.len();
                info!(
                    "wifi pass: {} ({} chars)",
                    if pass_len == 0 { "<empty>" } else { "********" },
                    pass_len
                );
            }
            Command::EapShow => {
                let cfg = lock(config);
                info!("eap: {}", if cfg.wifi_enterprise { "on" } else { "off" });
                info!("eap identity: {}", cfg.wifi_identity);
                info!("eap user: {}", cfg.wifi_username);
            }
            Command::RetriesShow => {
                let cfg = lock(config);
                info!("retries: wifi={} sntp={}", cfg.wifi_retries, cfg.sntp_retries);
            }
            Command::TzShow => info!("tz: {}", lock(config).timezone),
            Command::DebugShow => info!("debug: {}", debug_flags::status_line()),
            Command::DebugToggle(module) => {
                if let Some(on) = toggle_debug(module) {
                    info!("debug {}: {}", module, if on { "ON" } else { "OFF" });
                }
            }
            Command::Reboot => {
                info!("console: rebooting now");
                std::thread::sleep(Duration::from_millis(100));
                unsafe { esp_idf_sys::esp_restart() };
            }
            Command::Usage(usage) => info!("usage: {}", usage),
            Command::Unknown(other) => {
                warn!("console: unknown command '{}' (type 'help')", other);
            }
            edit => {
                persist(edit, &mut lock(nvs))?;
                edit.apply(&mut lock(config));
                info!("saved; type 'reboot' to apply");
            }
        }
        Ok(())
    }

    fn persist(cmd: &Command, nvs: &mut EspNvs<NvsDefault>) -> Result<()> {
        match cmd {
            Command::WifiSet { ssid, pass } => {
                Config::save_wifi(nvs, ssid, pass)?;
                info!("saved: SSID='{}' pass=******** ({} chars)", ssid, pass.len());
            }
            Command::WifiClear => Config::save_wifi(nvs, "", "")?,
            Command::EapEnable(on) => Config::save_enterprise(nvs, *on)?,
            Command::EapIdentity(id) => Config::save_identity(nvs, id)?,
            Command::EapUser(user) => Config::save_username(nvs, user)?,
            Command::WifiRetries(n) => Config::save_wifi_retries(nvs, *n)?,
            Command::SntpRetries(n) => Config::save_sntp_retries(nvs, *n)?,
            Command::TzSet(tz) => Config::save_timezone(nvs, tz)?,
            Command::SntpServer(host) => Config::save_sntp_server(nvs, host)?,
            Command::Pins { clk, dio } => Config::save_pins(nvs, *clk, *dio)?,
            Command::DebugMode(on) => Config::save_debug_mode(nvs, *on)?,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wifi_commands() {
        assert_eq!(
            parse_command("wifi set HomeNet secret123"),
            Command::WifiSet {
                ssid: "HomeNet".into(),
                pass: "secret123".into()
            }
        );
        assert_eq!(
            parse_command("wifi set \"Cafe\""),
            Command::WifiSet {
                ssid: "Cafe".into(),
                pass: String::new()
            }
        );
        assert!(matches!(parse_command("wifi set"), Command::Usage(_)));
        assert_eq!(parse_command("wifi"), Command::WifiShow);
        assert_eq!(parse_command("  wifi clear  "), Command::WifiClear);
    }

    #[test]
    fn parses_enterprise_and_numbers() {
        assert_eq!(parse_command("eap on"), Command::EapEnable(true));
        assert_eq!(parse_command("eap off"), Command::EapEnable(false));
        assert_eq!(
            parse_command("eap identity anon@uni.edu"),
            Command::EapIdentity("anon@uni.edu".into())
        );
        assert!(matches!(parse_command("eap user"), Command::Usage(_)));
        assert_eq!(parse_command("retries wifi 3"), Command::WifiRetries(3));
        assert_eq!(parse_command("retries sntp 0"), Command::SntpRetries(0));
        assert!(matches!(parse_command("retries wifi 300"), Command::Usage(_)));
        assert_eq!(parse_command("pins 18 19"), Command::Pins { clk: 18, dio: 19 });
        assert!(matches!(parse_command("pins 5 5"), Command::Usage(_)));
    }

    #[test]
    fn keeps_spaces_in_rules_and_rejects_unknowns() {
        assert_eq!(
            parse_command("tz set CET-1CEST,M3.5.0,M10.5.0/3"),
            Command::TzSet("CET-1CEST,M3.5.0,M10.5.0/3".into())
        );
        assert_eq!(
            parse_command("sntp server time.nist.gov"),
            Command::SntpServer("time.nist.gov".into())
        );
        assert_eq!(parse_command("debug-mode on"), Command::DebugMode(true));
        assert_eq!(parse_command("debug tm1637"), Command::DebugToggle("tm1637".into()));
        assert!(matches!(parse_command("debug touch"), Command::Usage(_)));
        assert_eq!(parse_command("frobnicate"), Command::Unknown("frobnicate".into()));
        assert_eq!(parse_command("   "), Command::Empty);
    }

    #[test]
    fn apply_edits_only_settings() {
        let mut cfg = Config::default();
        assert!(parse_command("wifi set HomeNet").apply(&mut cfg));
        assert_eq!(cfg.wifi_ssid, "HomeNet");
        assert!(cfg.wifi_pass.is_empty());

        assert!(parse_command("pins 4 5").apply(&mut cfg));
        assert_eq!((cfg.clk_pin, cfg.dio_pin), (4, 5));

        assert!(parse_command("retries sntp 9").apply(&mut cfg));
        assert_eq!(cfg.sntp_retries, 9);

        let before = cfg.clone();
        assert!(!parse_command("status").apply(&mut cfg));
        assert!(!parse_command("debug wifi").apply(&mut cfg));
        assert_eq!(cfg, before);
    }

    #[test]
    fn line_editor_handles_backspace_and_escapes() {
        let mut ed = LineEditor::default();
        let mut out = Vec::new();
        for &b in b"stx\x7fatus\x1b[A\r\n\rhelp\n" {
            if let Some(line) = ed.push(b) {
                out.push(line);
            }
        }
        assert_eq!(out, vec!["status".to_string(), "help".to_string()]);
    }

    fn feed(ed: &mut LineEditor, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|&b| ed.push(b)).collect()
    }

    #[test]
    fn line_editor_keeps_non_ascii_credentials_intact() {
        let mut ed = LineEditor::default();
        let lines = feed(&mut ed, "wifi set Café pässwört\n".as_bytes());
        assert_eq!(lines, vec!["wifi set Café pässwört".to_string()]);
        assert_eq!(
            parse_command(&lines[0]),
            Command::WifiSet {
                ssid: "Café".into(),
                pass: "pässwört".into()
            }
        );
    }

    #[test]
    fn backspace_removes_a_whole_multibyte_char() {
        let mut ed = LineEditor::default();
        let lines = feed(&mut ed, "eap user jos\u{e9}\x7fe\n".as_bytes());
        assert_eq!(lines, vec!["eap user jose".to_string()]);
    }

    #[test]
    fn invalid_utf8_lines_are_dropped() {
        let mut ed = LineEditor::default();
        assert!(feed(&mut ed, b"wifi set Caf\xe9\n").is_empty());
        // The editor is ready for the next line.
        assert_eq!(feed(&mut ed, b"status\n"), vec!["status".to_string()]);
    }
}
