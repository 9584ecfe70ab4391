//! ESP-IDF station driver feeding the connectivity supervisor.

use std::sync::mpsc::Receiver;

use anyhow::{anyhow, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent};
use esp_idf_sys::EspError;
use log::info;

use crate::chatty;
use crate::debug_flags::DEBUG_WIFI;
use crate::error::{self, ClockError};
use crate::wifi::{
    apply_enterprise_credentials, event_queue, Auth, CredentialSink, Credentials, HeapIntegrity,
    NetEvent, NetworkStack,
};

fn net_err(what: &str, e: EspError) -> ClockError {
    ClockError::Network(format!("{}: {}", what, e))
}

/// Owns the WiFi driver and the event-loop subscriptions that translate
/// station events into [`NetEvent`]s.
pub struct StationDriver {
    wifi: Box<EspWifi<'static>>,
    ssid: String,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
}

impl StationDriver {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        creds: &Credentials,
    ) -> Result<(Self, Receiver<NetEvent>)> {
        let mut wifi = Box::new(EspWifi::new(modem, sysloop.clone(), Some(nvs))?);

        let auth_method = match creds.auth() {
            Auth::Open => AuthMethod::None,
            Auth::Wpa2Personal => AuthMethod::WPA2Personal,
            Auth::Wpa2Enterprise => AuthMethod::WPA2Enterprise,
        };
        // Enterprise passwords go through the EAP client, not the station config.
        let password = if creds.enterprise {
            ""
        } else {
            creds.password.as_str()
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: creds
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: password
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        apply_enterprise_credentials(creds, &mut EspEapSink)?;

        // Subscriptions live as long as the driver; the queue is bounded.
        let (tx, rx) = event_queue();

        let wifi_tx = tx.clone();
        let wifi_events = sysloop.subscribe::<WifiEvent, _>(move |event| {
            let event = match event {
                WifiEvent::StaStarted => NetEvent::StationStarted,
                WifiEvent::StaDisconnected(_) => NetEvent::Disconnected,
                _ => return,
            };
            wifi_tx.post(event);
        })?;

        let ip_events = sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(assignment) = event {
                tx.post(NetEvent::GotAddress(assignment.ip()));
            }
        })?;

        info!("WiFi configured for '{}' ({:?})", creds.ssid, creds.auth());
        Ok((
            StationDriver {
                wifi,
                ssid: creds.ssid.clone(),
                _wifi_events: wifi_events,
                _ip_events: ip_events,
            },
            rx,
        ))
    }
}

impl NetworkStack for StationDriver {
    fn start(&mut self) -> error::Result<()> {
        self.wifi.start().map_err(|e| net_err("wifi start", e))
    }

    fn connect(&mut self) -> error::Result<()> {
        chatty!(DEBUG_WIFI, "WiFi connecting to '{}'", self.ssid);
        self.wifi.connect().map_err(|e| net_err("wifi connect", e))
    }
}

fn eap_check(what: &str, rc: esp_idf_sys::esp_err_t) -> error::Result<()> {
    EspError::convert(rc).map_err(|e| net_err(what, e))
}

/// WPA2-Enterprise credentials through the ESP-IDF EAP client.
pub struct EspEapSink;

impl CredentialSink for EspEapSink {
    fn set_password(&mut self, password: &str) -> error::Result<()> {
        let rc = unsafe {
            esp_idf_sys::esp_eap_client_set_password(password.as_ptr(), password.len() as i32)
        };
        eap_check("eap password", rc)
    }

    fn set_identity(&mut self, identity: &str) -> error::Result<()> {
        let rc = unsafe {
            esp_idf_sys::esp_eap_client_set_identity(identity.as_ptr(), identity.len() as i32)
        };
        eap_check("eap identity", rc)
    }

    fn set_username(&mut self, username: &str) -> error::Result<()> {
        let rc = unsafe {
            esp_idf_sys::esp_eap_client_set_username(username.as_ptr(), username.len() as i32)
        };
        eap_check("eap username", rc)
    }

    fn enable_enterprise(&mut self) -> error::Result<()> {
        let rc = unsafe { esp_idf_sys::esp_wifi_sta_enterprise_enable() };
        eap_check("eap enable", rc)
    }
}

/// Walks every heap region, checking block headers and poison bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EspHeapCheck;

impl HeapIntegrity for EspHeapCheck {
    fn is_intact(&self) -> bool {
        unsafe { esp_idf_sys::heap_caps_check_integrity_all(true) }
    }
}
