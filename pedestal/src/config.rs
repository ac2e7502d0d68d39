//! Typed service configuration
//!
//! Built once at startup from a [`SettingsProvider`]. Every value has an
//! explicit default, so an empty provider yields [`PedestalConfig::default`].
//!
//! | key | default |
//! |---|---|
//! | `udp.firmware_address` | `127.0.0.1:9001` |
//! | `udp.local_address` | `0.0.0.0:9000` |
//! | `udp.receive_interval_ms` | 10 |
//! | `udp.send_interval_ms` | 30 |
//! | `udp.receive_warn_ms` | 15 |
//! | `udp.send_warn_ms` | 25 |
//! | `udp.channel_reconnect_delay_ms` | 5000 |
//! | `udp.reconnect_delay_ms` | 1000 |
//! | `udp.max_buffer_size` | 1024 |
//! | `udp.health_timeout_ms` | 1000 |
//! | `udp.max_datagrams_per_tick` | 32 |
//! | `stow.settle_delay_ms` | 100 |
//! | `stow.poll_interval_ms` | 100 |
//! | `stow.tolerance_deg` | 0.1 |
//! | `stow.speed_deg_s` | 5.0 |
//! | `stow.train_target_deg` | 0.0 |
//! | `stow.azimuth_target_deg` | 0.0 |
//! | `stow.elevation_target_deg` | 90.0 |
//! | `stow.stabilization_timeout_ms` | 30000 |
//! | `error_log.capacity` | 1000 |
//! | `error_log.resolved_display_secs` | 30 |
//! | `error_log.popup_push_interval_ms` | 1000 |
//! | `api.bind_address` | `0.0.0.0:8080` |

use std::time::Duration;

use crate::error::ConfigError;
use crate::settings::{setting_or, SettingsProvider};

/// UDP link and scheduler timing.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub firmware_address: String,
    pub local_address: String,
    pub receive_interval: Duration,
    pub send_interval: Duration,
    pub receive_warn_threshold: Duration,
    pub send_warn_threshold: Duration,
    /// Delay between failed channel initialization attempts
    pub channel_reconnect_delay: Duration,
    /// Pause between teardown and re-initialization on operator reconnect
    pub reconnect_delay: Duration,
    pub max_buffer_size: usize,
    /// Link is unhealthy when no status frame arrived for this long
    pub health_timeout: Duration,
    pub max_datagrams_per_tick: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            firmware_address: "127.0.0.1:9001".to_string(),
            local_address: "0.0.0.0:9000".to_string(),
            receive_interval: Duration::from_millis(10),
            send_interval: Duration::from_millis(30),
            receive_warn_threshold: Duration::from_millis(15),
            send_warn_threshold: Duration::from_millis(25),
            channel_reconnect_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_millis(1000),
            max_buffer_size: 1024,
            health_timeout: Duration::from_millis(1000),
            max_datagrams_per_tick: 32,
        }
    }
}

/// Stow sequence targets and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct StowConfig {
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub tolerance_deg: f32,
    pub speed_deg_s: f32,
    pub train_target_deg: f32,
    pub azimuth_target_deg: f32,
    pub elevation_target_deg: f32,
    pub stabilization_timeout: Duration,
}

impl Default for StowConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
            tolerance_deg: 0.1,
            speed_deg_s: 5.0,
            train_target_deg: 0.0,
            azimuth_target_deg: 0.0,
            elevation_target_deg: 90.0,
            stabilization_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLogConfig {
    pub capacity: usize,
    /// How long a resolved entry may stay the status bar's latest entry
    pub resolved_display_window: Duration,
    pub popup_push_interval: Duration,
}

impl Default for ErrorLogConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            resolved_display_window: Duration::from_secs(30),
            popup_push_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PedestalConfig {
    pub link: LinkConfig,
    pub stow: StowConfig,
    pub error_log: ErrorLogConfig,
    pub api: ApiConfig,
}

impl PedestalConfig {
    /// Build the configuration, falling back to defaults for unset keys.
    pub fn from_settings(settings: &dyn SettingsProvider) -> Result<Self, ConfigError> {
        let d = PedestalConfig::default();

        let link = LinkConfig {
            firmware_address: setting_or(
                settings,
                "udp.firmware_address",
                d.link.firmware_address,
            )?,
            local_address: setting_or(settings, "udp.local_address", d.link.local_address)?,
            receive_interval: millis(settings, "udp.receive_interval_ms", d.link.receive_interval)?,
            send_interval: millis(settings, "udp.send_interval_ms", d.link.send_interval)?,
            receive_warn_threshold: millis(
                settings,
                "udp.receive_warn_ms",
                d.link.receive_warn_threshold,
            )?,
            send_warn_threshold: millis(settings, "udp.send_warn_ms", d.link.send_warn_threshold)?,
            channel_reconnect_delay: millis(
                settings,
                "udp.channel_reconnect_delay_ms",
                d.link.channel_reconnect_delay,
            )?,
            reconnect_delay: millis(settings, "udp.reconnect_delay_ms", d.link.reconnect_delay)?,
            max_buffer_size: positive(settings, "udp.max_buffer_size", d.link.max_buffer_size)?,
            health_timeout: millis(settings, "udp.health_timeout_ms", d.link.health_timeout)?,
            max_datagrams_per_tick: positive(
                settings,
                "udp.max_datagrams_per_tick",
                d.link.max_datagrams_per_tick,
            )?,
        };

        let stow = StowConfig {
            settle_delay: millis(settings, "stow.settle_delay_ms", d.stow.settle_delay)?,
            poll_interval: millis(settings, "stow.poll_interval_ms", d.stow.poll_interval)?,
            tolerance_deg: setting_or(settings, "stow.tolerance_deg", d.stow.tolerance_deg)?,
            speed_deg_s: setting_or(settings, "stow.speed_deg_s", d.stow.speed_deg_s)?,
            train_target_deg: setting_or(
                settings,
                "stow.train_target_deg",
                d.stow.train_target_deg,
            )?,
            azimuth_target_deg: setting_or(
                settings,
                "stow.azimuth_target_deg",
                d.stow.azimuth_target_deg,
            )?,
            elevation_target_deg: setting_or(
                settings,
                "stow.elevation_target_deg",
                d.stow.elevation_target_deg,
            )?,
            stabilization_timeout: millis(
                settings,
                "stow.stabilization_timeout_ms",
                d.stow.stabilization_timeout,
            )?,
        };

        let error_log = ErrorLogConfig {
            capacity: positive(settings, "error_log.capacity", d.error_log.capacity)?,
            resolved_display_window: Duration::from_secs(setting_or(
                settings,
                "error_log.resolved_display_secs",
                d.error_log.resolved_display_window.as_secs(),
            )?),
            popup_push_interval: millis(
                settings,
                "error_log.popup_push_interval_ms",
                d.error_log.popup_push_interval,
            )?,
        };

        let api = ApiConfig {
            bind_address: setting_or(settings, "api.bind_address", d.api.bind_address)?,
        };

        Ok(Self {
            link,
            stow,
            error_log,
            api,
        })
    }
}

/// Millisecond duration setting; zero is rejected.
fn millis(
    settings: &dyn SettingsProvider,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let ms = positive(settings, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

fn positive<T>(settings: &dyn SettingsProvider, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = setting_or(settings, key, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MapSettings;

    #[test]
    fn test_empty_settings_yield_defaults() {
        let config = PedestalConfig::from_settings(&MapSettings::new()).unwrap();
        assert_eq!(config, PedestalConfig::default());
        assert_eq!(config.link.receive_interval, Duration::from_millis(10));
        assert_eq!(config.link.send_interval, Duration::from_millis(30));
        assert_eq!(config.link.channel_reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.link.max_buffer_size, 1024);
        assert_eq!(config.stow.stabilization_timeout, Duration::from_secs(30));
        assert_eq!(config.error_log.capacity, 1000);
    }

    #[test]
    fn test_overrides() {
        let settings = MapSettings::new()
            .with("udp.firmware_address", "192.168.10.2:7000")
            .with("udp.send_interval_ms", "50")
            .with("stow.elevation_target_deg", "85.5")
            .with("error_log.resolved_display_secs", "10");
        let config = PedestalConfig::from_settings(&settings).unwrap();
        assert_eq!(config.link.firmware_address, "192.168.10.2:7000");
        assert_eq!(config.link.send_interval, Duration::from_millis(50));
        assert_eq!(config.stow.elevation_target_deg, 85.5);
        assert_eq!(
            config.error_log.resolved_display_window,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let settings = MapSettings::new().with("udp.receive_interval_ms", "0");
        let err = PedestalConfig::from_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("udp.receive_interval_ms"));
    }

    #[test]
    fn test_unparseable_value_rejected() {
        let settings = MapSettings::new().with("stow.tolerance_deg", "tight");
        assert!(PedestalConfig::from_settings(&settings).is_err());
    }
}
