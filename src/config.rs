use anyhow::Result;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::platform::{Accuracy, SamplingOptions};

/// Tunables of the tracking pipeline. Every threshold is a named setting so
/// deployments can override the movement policy without code changes.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub min_distance_m: f64,
    pub move_interval: Duration,
    pub still_interval: Duration,
    pub max_accuracy_m: f64,
    pub foreground: SamplingOptions,
    pub background: SamplingOptions,
    pub background_task_id: String,
    pub fix_timeout: Duration,
    pub uplink_timeout: Duration,
    pub retry_interval: Duration,
    pub max_retries: u32,
    pub circuit_breaker_cooldown: Duration,
    pub health_poll_interval: Duration,
    pub health_probe_timeout: Duration,
    pub logout_flush_attempts: u32,
    pub logout_flush_delay: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_distance_m: 20.0,
            move_interval: Duration::from_secs(5),
            still_interval: Duration::from_secs(10 * 60),
            max_accuracy_m: 300.0,
            foreground: SamplingOptions {
                accuracy: Accuracy::High,
                time_interval: Duration::from_secs(30),
                distance_interval_m: 10.0,
            },
            background: SamplingOptions {
                accuracy: Accuracy::Balanced,
                time_interval: Duration::from_secs(60),
                distance_interval_m: 20.0,
            },
            background_task_id: "field-tracker-location".to_string(),
            fix_timeout: Duration::from_secs(10),
            uplink_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(60),
            max_retries: 5,
            circuit_breaker_cooldown: Duration::from_secs(300),
            health_poll_interval: Duration::from_secs(60),
            health_probe_timeout: Duration::from_secs(8),
            logout_flush_attempts: 3,
            logout_flush_delay: Duration::from_secs(2),
        }
    }
}

impl TrackingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let foreground = SamplingOptions {
            time_interval: secs_var("FOREGROUND_INTERVAL_SECS", defaults.foreground.time_interval),
            distance_interval_m: parse_var(
                "FOREGROUND_DISTANCE_M",
                defaults.foreground.distance_interval_m,
            ),
            ..defaults.foreground
        };
        let background = SamplingOptions {
            time_interval: secs_var("BACKGROUND_INTERVAL_SECS", defaults.background.time_interval),
            distance_interval_m: parse_var(
                "BACKGROUND_DISTANCE_M",
                defaults.background.distance_interval_m,
            ),
            ..defaults.background
        };

        Self {
            min_distance_m: parse_var("MIN_DISTANCE_M", defaults.min_distance_m),
            move_interval: secs_var("MOVE_INTERVAL_SECS", defaults.move_interval),
            still_interval: secs_var("STILL_INTERVAL_SECS", defaults.still_interval),
            max_accuracy_m: parse_var("MAX_ACCURACY_M", defaults.max_accuracy_m),
            foreground,
            background,
            background_task_id: env::var("BACKGROUND_TASK_ID")
                .unwrap_or(defaults.background_task_id),
            fix_timeout: secs_var("FIX_TIMEOUT_SECS", defaults.fix_timeout),
            uplink_timeout: secs_var("UPLINK_TIMEOUT_SECS", defaults.uplink_timeout),
            retry_interval: secs_var("RETRY_INTERVAL_SECS", defaults.retry_interval),
            max_retries: parse_var("MAX_RETRIES", defaults.max_retries),
            circuit_breaker_cooldown: secs_var(
                "CIRCUIT_BREAKER_COOLDOWN",
                defaults.circuit_breaker_cooldown,
            ),
            health_poll_interval: secs_var("HEALTH_POLL_SECS", defaults.health_poll_interval),
            health_probe_timeout: secs_var(
                "HEALTH_PROBE_TIMEOUT_SECS",
                defaults.health_probe_timeout,
            ),
            logout_flush_attempts: parse_var(
                "LOGOUT_FLUSH_ATTEMPTS",
                defaults.logout_flush_attempts,
            ),
            logout_flush_delay: secs_var("LOGOUT_FLUSH_DELAY_SECS", defaults.logout_flush_delay),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub location_endpoint: String,
    pub database_url: String,
    pub auth_token: String,
    pub replay_file: Option<String>,
    pub replay_pace: Duration,
    pub log_level: String,
    pub tracking: TrackingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let api_base_url =
            env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let location_endpoint =
            env::var("LOCATION_ENDPOINT").unwrap_or_else(|_| "/locations".to_string());
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://field-tracker.db".to_string());
        let auth_token = env::var("AUTH_TOKEN").unwrap_or_default();
        let replay_file = env::var("REPLAY_FILE").ok().filter(|p| !p.trim().is_empty());
        let replay_pace = secs_var("REPLAY_PACE_SECS", Duration::from_secs(1));
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_base_url,
            location_endpoint,
            database_url,
            auth_token,
            replay_file,
            replay_pace,
            log_level,
            tracking: TrackingConfig::from_env(),
        })
    }

    pub fn location_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.location_endpoint.trim_start_matches('/')
        )
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn secs_var(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
