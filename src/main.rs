//! ESP32 firmware binary: dual-SX1276 AU915 packet-forwarder gateway.

#[cfg(feature = "esp32")]
use esp_idf_sys as _;

#[cfg(feature = "esp32")]
fn main() {
    use esp_idf_hal::gpio::{IOPin, PinDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::spi::config::{Config as SpiConfig, DriverConfig};
    use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver};
    use esp_idf_hal::units::FromValueType;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use log::{info, warn};
    use lora_gateway_esp32::esp32::{
        attach_dio0, device_eui, hardware_reset, EspClock, EspSpi, NvsConfigStore, WifiLink,
    };
    use lora_gateway_esp32::forwarder::{ForwarderConfig, PacketForwarder};
    use lora_gateway_esp32::packet::SpreadingFactor;
    use lora_gateway_esp32::{
        au915, config::ConfigStore, config::GatewayConfig, Gateway, GatewayOptions, RadioConfig,
        Sx1276,
    };
    use std::sync::Arc;
    use std::time::Duration;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("========================================");
    info!("  AU915 dual-radio LoRaWAN gateway");
    info!("========================================");

    let peripherals = Peripherals::take().expect("peripherals");
    let sysloop = EspSystemEventLoop::take().expect("event loop");

    // Durable configuration, with MAC-derived EUI defaults on first boot.
    let store = NvsConfigStore::new().expect("NVS");
    let config = match store.load() {
        Ok(Some(config)) => config,
        Ok(None) => {
            info!("no saved config, using defaults");
            GatewayConfig::defaults(device_eui())
        }
        Err(e) => {
            warn!("config load failed ({}), using defaults", e);
            GatewayConfig::defaults(device_eui())
        }
    };
    info!(
        "gateway EUI: {}",
        lora_gateway_esp32::config::eui_to_string(&config.gateway_eui)
    );
    info!("server: {}:{}", config.server.host, config.server.port);
    info!("sub-band: {}", config.lora.subband + 1);

    // Backhaul link.
    let link = Arc::new(WifiLink::new(peripherals.modem, sysloop).expect("Wi-Fi init"));
    if config.link.wifi_enabled {
        if let Err(e) = link.connect(&config.link.wifi_ssid, &config.link.wifi_password) {
            warn!("Wi-Fi connect failed: {:?}, continuing offline", e);
        }
    }

    // Shared SPI bus, one chip-select per radio.
    let pins = peripherals.pins;
    let spi_driver = Arc::new(
        SpiDriver::new(
            peripherals.spi2,
            pins.gpio18,
            pins.gpio23,
            Some(pins.gpio19),
            &DriverConfig::new(),
        )
        .expect("SPI bus"),
    );
    let spi_config = SpiConfig::new().baudrate(8.MHz().into());

    let clock = Arc::new(EspClock);

    // RX radio: first enabled channel of the active sub-band.
    let mut rx_reset = PinDriver::output(pins.gpio14.downgrade()).expect("RX reset pin");
    hardware_reset(&mut rx_reset).expect("RX reset");
    let rx_spi = EspSpi::new(
        SpiDeviceDriver::new(spi_driver.clone(), Some(pins.gpio5), &spi_config).expect("RX CS"),
    );
    let rx_radio = Arc::new(
        Sx1276::init(
            rx_spi,
            RadioConfig {
                frequency_hz: config.uplink_frequency(0),
                spreading_factor: SpreadingFactor::new(config.lora.rx_sf)
                    .unwrap_or_else(|| SpreadingFactor::new(7).unwrap()),
                bandwidth: config.lora.rx_bandwidth,
                tx_power_dbm: config.lora.tx_power_dbm,
                sync_word: config.lora.sync_word,
                ..RadioConfig::default()
            },
            clock.clone(),
            0,
        )
        .expect("RX radio init (check SX1276 wiring)"),
    );
    attach_dio0(
        PinDriver::input(pins.gpio26.downgrade()).expect("RX DIO0 pin"),
        rx_radio.clone(),
    )
    .expect("RX DIO0");

    // TX radio: parked on the RX2 defaults until a downlink retunes it.
    let mut tx_reset = PinDriver::output(pins.gpio12.downgrade()).expect("TX reset pin");
    hardware_reset(&mut tx_reset).expect("TX reset");
    let tx_spi = EspSpi::new(
        SpiDeviceDriver::new(spi_driver, Some(pins.gpio15), &spi_config).expect("TX CS"),
    );
    let (rx2_freq, rx2_sf, rx2_bw) = au915::rx2_defaults();
    let tx_radio = Arc::new(
        Sx1276::init(
            tx_spi,
            RadioConfig {
                frequency_hz: rx2_freq,
                spreading_factor: rx2_sf,
                bandwidth: rx2_bw,
                tx_power_dbm: config.lora.tx_power_dbm,
                sync_word: config.lora.sync_word,
                ..RadioConfig::default()
            },
            clock.clone(),
            1,
        )
        .expect("TX radio init (check SX1276 wiring)"),
    );
    attach_dio0(
        PinDriver::input(pins.gpio27.downgrade()).expect("TX DIO0 pin"),
        tx_radio.clone(),
    )
    .expect("TX DIO0");

    // Gateway core and protocol engine.
    let gateway = Arc::new(Gateway::new(
        rx_radio,
        tx_radio,
        clock.clone(),
        GatewayOptions {
            forward_crc_invalid: false,
            hop_frequencies: au915::subband_frequencies(config.lora.subband).to_vec(),
        },
    ));
    gateway.start().expect("gateway start");

    let forwarder = Arc::new(PacketForwarder::new(
        ForwarderConfig::from_gateway_config(&config),
        link.clone(),
        clock,
        gateway.stats_handle(),
        gateway.clone(),
    ));
    {
        let forwarder = forwarder.clone();
        gateway.set_uplink_handler(Box::new(move |descriptor| {
            forwarder.submit_uplink(descriptor);
        }));
    }

    use lora_gateway_esp32::LinkState;
    if link.is_connected() {
        forwarder.start().expect("forwarder start");
    }

    info!("========================================");
    info!("  Gateway ready");
    info!("========================================");

    loop {
        std::thread::sleep(Duration::from_secs(60));

        // Restart the forwarder after the link comes back.
        if link.is_connected() && !forwarder.is_connected() {
            if let Err(e) = forwarder.start() {
                warn!("forwarder restart failed: {}", e);
            }
        }

        let stats = gateway.stats();
        info!("=== Gateway status ===");
        info!("uptime: {} s", stats.uptime_seconds);
        info!(
            "RX: total={} ok={} bad={} fwd={} dropped={}",
            stats.rx_total, stats.rx_ok, stats.rx_bad, stats.rx_forwarded, stats.rx_dropped
        );
        info!(
            "TX: total={} ok={} fail={} collision={}",
            stats.tx_total, stats.tx_ok, stats.tx_fail, stats.tx_collision
        );
        info!(
            "link: {}, server: {}",
            if link.is_connected() { "up" } else { "down" },
            if forwarder.is_connected() {
                "connected"
            } else {
                "disconnected"
            }
        );
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo test' for host testing of the gateway core.");
}
