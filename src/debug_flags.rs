use std::sync::atomic::{AtomicBool, Ordering};

/// Global debug flags toggled via console.
/// When a flag is true, the module logs at info! level instead of debug!.
pub static DEBUG_WIFI: AtomicBool = AtomicBool::new(false);
pub static DEBUG_SNTP: AtomicBool = AtomicBool::new(false);
pub static DEBUG_DISPLAY: AtomicBool = AtomicBool::new(false);
pub static DEBUG_HTTP: AtomicBool = AtomicBool::new(false);

pub fn is_on(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

pub fn set(flag: &AtomicBool, val: bool) {
    flag.store(val, Ordering::Relaxed);
}

pub fn toggle(flag: &AtomicBool) -> bool {
    !flag.fetch_xor(true, Ordering::Relaxed)
}

/// Look up a flag by its console name.
pub fn by_name(name: &str) -> Option<&'static AtomicBool> {
    match name {
        "wifi" | "net" => Some(&DEBUG_WIFI),
        "sntp" | "time" => Some(&DEBUG_SNTP),
        "display" | "tm1637" => Some(&DEBUG_DISPLAY),
        "http" | "web" => Some(&DEBUG_HTTP),
        _ => None,
    }
}

pub fn all() -> [&'static AtomicBool; 4] {
    [&DEBUG_WIFI, &DEBUG_SNTP, &DEBUG_DISPLAY, &DEBUG_HTTP]
}

pub fn status_line() -> String {
    format!(
        "wifi={} sntp={} display={} http={}",
        if is_on(&DEBUG_WIFI) { "ON" } else { "off" },
        if is_on(&DEBUG_SNTP) { "ON" } else { "off" },
        if is_on(&DEBUG_DISPLAY) { "ON" } else { "off" },
        if is_on(&DEBUG_HTTP) { "ON" } else { "off" },
    )
}

/// Log at info! when `flag` is on, debug! otherwise.
#[macro_export]
macro_rules! chatty {
    ($flag:expr, $($arg:tt)+) => {
        if $crate::debug_flags::is_on(&$flag) {
            log::info!($($arg)+);
        } else {
            log::debug!($($arg)+);
        }
    };
}
