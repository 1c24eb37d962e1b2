//! Startup configuration
//!
//! Every option can come from a flag or an `AMBILIGHT_*` environment variable.
//! Nothing is checked at runtime: [`Config::validate`] rejects bad values
//! before the loop exists.

use crate::bulb::BulbTarget;
use crate::error::AppError;
use crate::reduce::ShapingConfig;
use clap::Parser;
use std::net::Ipv4Addr;
use std::time::Duration;

const INTERVAL_RANGE_MS: (u64, u64) = (10, 10_000);
const CAPTURE_TIMEOUT_RANGE_MS: (u64, u64) = (1, 10_000);
const MAX_SATURATION_BOOST: f32 = 4.0;
const MAX_BRIGHTNESS_BOOST: f32 = 4.0;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "wiz-ambilight",
    version,
    about = "Mirror the screen's dominant color on a WiZ bulb"
)]
pub struct Config {
    /// IPv4 address of the bulb
    #[arg(long, env = "AMBILIGHT_BULB_IP")]
    pub bulb_ip: String,

    /// Milliseconds between samples
    #[arg(long, env = "AMBILIGHT_INTERVAL_MS", default_value_t = 100)]
    pub interval_ms: u64,

    /// Smoothing factor in (0, 1]; higher reacts faster, lower flickers less
    #[arg(long, env = "AMBILIGHT_ALPHA", default_value_t = 0.75)]
    pub alpha: f32,

    #[arg(long, env = "AMBILIGHT_SATURATION_BOOST", default_value_t = 1.4)]
    pub saturation_boost: f32,

    #[arg(long, env = "AMBILIGHT_BRIGHTNESS_BOOST", default_value_t = 1.1)]
    pub brightness_boost: f32,

    /// Brightness floor (0-255); 0 lets dark scenes turn the bulb dark
    #[arg(long, env = "AMBILIGHT_MIN_BRIGHTNESS", default_value_t = 10)]
    pub min_brightness: u8,

    /// Brightness ceiling (1-255); 255 lets bright scenes show as pure white
    #[arg(long, env = "AMBILIGHT_MAX_BRIGHTNESS", default_value_t = 240)]
    pub max_brightness: u8,

    /// Upper bound on a single UDP send, at most the interval
    #[arg(long, env = "AMBILIGHT_SEND_TIMEOUT_MS", default_value_t = 50)]
    pub send_timeout_ms: u64,

    /// Deadline for one capture, shared by the window lookup and the screenshot
    #[arg(long, env = "AMBILIGHT_CAPTURE_TIMEOUT_MS", default_value_t = 1000)]
    pub capture_timeout_ms: u64,

    /// Only capture the Hyprland window whose class contains this (e.g. "vlc")
    #[arg(long, env = "AMBILIGHT_WINDOW_CLASS")]
    pub window_class: Option<String>,

    #[arg(long, env = "AMBILIGHT_GRIM_PATH", default_value = "grim")]
    pub grim_path: String,
}

/// Validated configuration the rest of the program runs on
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: BulbTarget,
    pub interval: Duration,
    pub alpha: f32,
    pub shaping: ShapingConfig,
    pub send_timeout: Duration,
    pub capture_timeout: Duration,
    pub window_class: Option<String>,
    pub grim_path: String,
}

fn invalid(msg: impl Into<String>) -> AppError {
    AppError::Config(msg.into())
}

/// WiZ bulbs only speak IPv4
fn parse_bulb_ip(raw: &str) -> Result<Ipv4Addr, AppError> {
    let ip: Ipv4Addr = raw
        .trim()
        .parse()
        .map_err(|_| invalid(format!("bulb IP {:?} is not a valid IPv4 address", raw)))?;

    if ip.is_unspecified() || ip.is_multicast() || ip.is_broadcast() {
        return Err(invalid(format!("bulb IP {} cannot address a single bulb", ip)));
    }

    Ok(ip)
}

fn check_range(name: &str, value: u64, (min, max): (u64, u64)) -> Result<(), AppError> {
    if value < min || value > max {
        return Err(invalid(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<Settings, AppError> {
        let ip = parse_bulb_ip(&self.bulb_ip)?;

        check_range("interval-ms", self.interval_ms, INTERVAL_RANGE_MS)?;
        check_range("send-timeout-ms", self.send_timeout_ms, (1, self.interval_ms))?;
        check_range(
            "capture-timeout-ms",
            self.capture_timeout_ms,
            CAPTURE_TIMEOUT_RANGE_MS,
        )?;

        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(invalid(format!("alpha must be in (0, 1], got {}", self.alpha)));
        }
        if !(1.0..=MAX_SATURATION_BOOST).contains(&self.saturation_boost) {
            return Err(invalid(format!(
                "saturation-boost must be between 1 and {}, got {}",
                MAX_SATURATION_BOOST, self.saturation_boost
            )));
        }
        if !(self.brightness_boost > 0.0 && self.brightness_boost <= MAX_BRIGHTNESS_BOOST) {
            return Err(invalid(format!(
                "brightness-boost must be in (0, {}], got {}",
                MAX_BRIGHTNESS_BOOST, self.brightness_boost
            )));
        }
        if self.max_brightness == 0 {
            return Err(invalid("max-brightness must be above 0"));
        }
        if self.min_brightness > self.max_brightness {
            return Err(invalid(format!(
                "min-brightness {} exceeds max-brightness {}",
                self.min_brightness, self.max_brightness
            )));
        }

        let window_class = match self.window_class.as_deref().map(str::trim) {
            Some("") => return Err(invalid("window-class cannot be empty")),
            Some(class) => Some(class.to_string()),
            None => None,
        };
        if self.grim_path.trim().is_empty() {
            return Err(invalid("grim-path cannot be empty"));
        }

        Ok(Settings {
            target: BulbTarget::new(ip),
            interval: Duration::from_millis(self.interval_ms),
            alpha: self.alpha,
            shaping: ShapingConfig {
                saturation_boost: self.saturation_boost,
                brightness_boost: self.brightness_boost,
                min_brightness: self.min_brightness,
                max_brightness: self.max_brightness,
            },
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            capture_timeout: Duration::from_millis(self.capture_timeout_ms),
            window_class,
            grim_path: self.grim_path.clone(),
        })
    }
}
