//! ESP32 platform bindings.
//!
//! Wires the platform-independent core to ESP-IDF: SPI devices on the
//! shared bus, the DIO0 interrupt dispatch, the microsecond timer, NVS
//! configuration storage and the Wi-Fi backhaul link.

use crate::config::{ConfigError, ConfigStore, GatewayConfig};
use crate::link::LinkState;
use crate::radio::{BusError, SpiDevice, Sx1276};
use crate::time::MonotonicClock;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyIOPin, Input, InterruptType, Output, PinDriver};
use esp_idf_hal::modem::Modem;
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver};
use esp_idf_hal::task::notification::Notification;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use esp_idf_sys::EspError;
use log::{info, warn};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

/// Microsecond clock backed by `esp_timer`, shared by the radio interrupt
/// path and the protocol engine.
pub struct EspClock;

impl MonotonicClock for EspClock {
    fn now_us(&self) -> u32 {
        (unsafe { esp_idf_sys::esp_timer_get_time() }) as u32
    }
}

/// One radio's SPI binding on the shared bus. Each radio gets its own
/// chip-select; the ESP-IDF bus driver arbitrates between them.
pub struct EspSpi<'d> {
    device: SpiDeviceDriver<'d, Arc<SpiDriver<'d>>>,
}

impl<'d> EspSpi<'d> {
    pub fn new(device: SpiDeviceDriver<'d, Arc<SpiDriver<'d>>>) -> Self {
        Self { device }
    }
}

impl SpiDevice for EspSpi<'static> {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        self.device
            .transfer(rx, tx)
            .map_err(|e| BusError::new(format!("{:?}", e)))
    }

    fn write(&mut self, tx: &[u8]) -> Result<(), BusError> {
        self.device
            .write(tx)
            .map_err(|e| BusError::new(format!("{:?}", e)))
    }
}

/// Pulse the radio's reset line: 1 ms low, then 10 ms for the chip to boot.
pub fn hardware_reset(reset: &mut PinDriver<'_, AnyIOPin, Output>) -> Result<(), EspError> {
    reset.set_low()?;
    FreeRtos::delay_ms(1);
    reset.set_high()?;
    FreeRtos::delay_ms(10);
    Ok(())
}

/// Route a radio's DIO0 rising edge to its interrupt handler.
///
/// The GPIO ISR only posts a notification; a dedicated dispatch thread
/// performs the SPI work, so nothing blocks in interrupt context.
pub fn attach_dio0<SPI>(
    mut dio0: PinDriver<'static, AnyIOPin, Input>,
    radio: Arc<Sx1276<SPI>>,
) -> Result<(), EspError>
where
    SPI: SpiDevice + 'static,
{
    dio0.set_interrupt_type(InterruptType::PosEdge)?;

    let notification = Notification::new();
    let notifier = notification.notifier();
    unsafe {
        dio0.subscribe(move || {
            notifier.notify_and_yield(NonZeroU32::new(1).unwrap());
        })?;
    }

    std::thread::Builder::new()
        .name("dio0-dispatch".to_string())
        .stack_size(4096)
        .spawn(move || loop {
            if dio0.enable_interrupt().is_err() {
                warn!("DIO0 interrupt re-arm failed");
                return;
            }
            notification.wait(esp_idf_hal::delay::BLOCK);
            radio.handle_interrupt();
        })
        .expect("failed to spawn DIO0 dispatch thread");

    Ok(())
}

/// Gateway EUI derived from the station MAC.
pub fn device_eui() -> [u8; 8] {
    let mut mac = [0u8; 6];
    unsafe {
        esp_idf_sys::esp_read_mac(mac.as_mut_ptr(), esp_idf_sys::esp_mac_type_t_ESP_MAC_WIFI_STA);
    }
    crate::config::eui_from_mac(mac)
}

const NVS_NAMESPACE: &str = "gateway";
const NVS_CONFIG_KEY: &str = "config";
const NVS_CONFIG_MAX: usize = 2048;

/// Durable configuration in NVS, stored as one serialized blob.
pub struct NvsConfigStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsConfigStore {
    pub fn new() -> Result<Self, EspError> {
        let partition = EspNvsPartition::<NvsDefault>::take()?;
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }
}

fn esp_config_error(e: EspError) -> ConfigError {
    ConfigError::Io(std::io::Error::other(format!("NVS error: {:?}", e)))
}

impl ConfigStore for NvsConfigStore {
    fn load(&self) -> Result<Option<GatewayConfig>, ConfigError> {
        let mut buf = [0u8; NVS_CONFIG_MAX];
        match self.nvs.get_raw(NVS_CONFIG_KEY, &mut buf) {
            Ok(Some(bytes)) => Ok(Some(serde_json::from_slice(bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(esp_config_error(e)),
        }
    }

    fn save(&mut self, config: &GatewayConfig) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec(config)?;
        self.nvs
            .set_raw(NVS_CONFIG_KEY, &bytes)
            .map_err(esp_config_error)?;
        Ok(())
    }
}

/// Wi-Fi backhaul link.
pub struct WifiLink {
    wifi: Mutex<BlockingWifi<EspWifi<'static>>>,
}

impl WifiLink {
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Result<Self, EspError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), None)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        Ok(Self {
            wifi: Mutex::new(wifi),
        })
    }

    /// Connect as a station and wait for DHCP.
    pub fn connect(&self, ssid: &str, password: &str) -> Result<(), EspError> {
        info!("connecting to Wi-Fi: {}", ssid);
        let mut wifi = self.wifi.lock().unwrap();

        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().unwrap_or_default(),
            password: password.try_into().unwrap_or_default(),
            auth_method,
            ..Default::default()
        });

        wifi.set_configuration(&config)?;
        wifi.start()?;
        wifi.connect()?;
        wifi.wait_netif_up()?;

        let ip = wifi.wifi().sta_netif().get_ip_info()?.ip;
        info!("Wi-Fi connected, IP: {}", ip);
        Ok(())
    }
}

impl LinkState for WifiLink {
    fn is_connected(&self) -> bool {
        self.wifi
            .lock()
            .unwrap()
            .is_connected()
            .unwrap_or(false)
    }

    fn ip_addr(&self) -> Option<IpAddr> {
        let wifi = self.wifi.lock().unwrap();
        if !wifi.is_connected().unwrap_or(false) {
            return None;
        }
        wifi.wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| IpAddr::V4(info.ip))
    }
}
