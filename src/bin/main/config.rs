//! Compile-time device configuration.

use babypod_hal_esp32s3::network::{ApiConfig, TimeConfig, WifiConfig};

const WIFI_SSID: &str = env!(
    "BABYPOD_WIFI_SSID",
    "Set BABYPOD_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "BABYPOD_WIFI_PASSWORD",
    "Set BABYPOD_WIFI_PASSWORD in your environment before building/flashing."
);
const API_HOST: &str = env!(
    "BABYPOD_API_HOST",
    "Set BABYPOD_API_HOST to the Baby Buddy server host name."
);
const AUTH_TOKEN: &str = env!(
    "BABYPOD_AUTH_TOKEN",
    "Set BABYPOD_AUTH_TOKEN to a Baby Buddy API token."
);
const TIME_PATH: &str = env!(
    "BABYPOD_TIME_PATH",
    "Set BABYPOD_TIME_PATH, e.g. /api/v2/<user>/integrations/time/clock?x-aio-key=<key>."
);

pub const WIFI_CONFIG: WifiConfig = WifiConfig::new(WIFI_SSID, WIFI_PASSWORD);

pub const API_CONFIG: ApiConfig = ApiConfig {
    host: API_HOST,
    port: parse_u16(option_env!("BABYPOD_API_PORT"), 80),
    path: or_default(option_env!("BABYPOD_API_PATH"), "/api"),
    token: AUTH_TOKEN,
    child_id: parse_u16(option_env!("BABYPOD_CHILD_ID"), 1) as u32,
    device: DEVICE_NAME,
};

pub const TIME_CONFIG: TimeConfig = TimeConfig {
    host: or_default(option_env!("BABYPOD_TIME_HOST"), "io.adafruit.com"),
    port: 80,
    path: TIME_PATH,
};

/// First line of every note the device writes.
pub const DEVICE_NAME: &str = or_default(option_env!("BABYPOD_DEVICE_NAME"), "BabyPod");

const fn or_default(value: Option<&'static str>, default: &'static str) -> &'static str {
    match value {
        Some(value) => value,
        None => default,
    }
}

/// Decimal parse usable in a const; anything malformed yields `default`.
const fn parse_u16(value: Option<&str>, default: u16) -> u16 {
    let Some(text) = value else {
        return default;
    };
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return default;
    }
    let mut out: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let digit = bytes[i];
        if !digit.is_ascii_digit() {
            return default;
        }
        out = out * 10 + (digit - b'0') as u32;
        if out > u16::MAX as u32 {
            return default;
        }
        i += 1;
    }
    out as u16
}
