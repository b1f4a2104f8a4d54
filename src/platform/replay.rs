use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{Accuracy, LocationService, PermissionStatus, SamplingOptions};
use crate::error::LocationError;
use crate::models::LocationFix;

/// Accuracy assumed for recorded points that do not carry one.
const DEFAULT_REPLAY_ACCURACY_M: f64 = 10.0;

/// One line of a recorded track. Numbers may arrive as JSON numbers or as
/// strings, as exported by most GPS loggers.
#[derive(Debug, Deserialize)]
pub struct ReplayRecord {
    #[serde(alias = "lat", deserialize_with = "parse_f64")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon", deserialize_with = "parse_f64")]
    pub longitude: f64,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub accuracy: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub heading: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub altitude: Option<f64>,
    #[serde(alias = "captured_at")]
    pub timestamp: String,
}

impl ReplayRecord {
    pub fn into_fix(self) -> Option<LocationFix> {
        let captured_at = parse_timestamp(&self.timestamp)?;
        Some(LocationFix {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy.unwrap_or(DEFAULT_REPLAY_ACCURACY_M),
            speed: self.speed,
            heading: self.heading,
            altitude: self.altitude,
            captured_at,
        })
    }
}

/// Accepts RFC 3339 as well as the wire layout with or without the `T`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|t| t.and_utc())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrFloat {
    String(String),
    Float(f64),
}

fn parse_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    parse_f64_option(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing number"))
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

/// Parses JSON-lines track data, skipping lines that cannot be used.
pub fn parse_track(contents: &str) -> Vec<LocationFix> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str::<ReplayRecord>(line) {
            Ok(record) => {
                let fix = record.into_fix();
                if fix.is_none() {
                    warn!("Replay line {} has an invalid timestamp, skipping", n + 1);
                }
                fix
            }
            Err(e) => {
                warn!("Failed to parse replay line {}: {}", n + 1, e);
                None
            }
        })
        .collect()
}

struct ReplayState {
    last: Mutex<Option<LocationFix>>,
    background: Mutex<HashSet<String>>,
    finished: watch::Sender<bool>,
}

/// Location service that plays back a recorded track through the
/// foreground watch, one fix per `pace`.
pub struct ReplayLocationService {
    fixes: Vec<LocationFix>,
    pace: Duration,
    state: Arc<ReplayState>,
}

impl ReplayLocationService {
    pub fn new(fixes: Vec<LocationFix>, pace: Duration) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            fixes,
            pace,
            state: Arc::new(ReplayState {
                last: Mutex::new(None),
                background: Mutex::new(HashSet::new()),
                finished,
            }),
        }
    }

    pub async fn from_file(path: &str, pace: Duration) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading replay file {path}"))?;
        let fixes = parse_track(&contents);
        info!("Loaded {} fixes from {}", fixes.len(), path);
        Ok(Self::new(fixes, pace))
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Resolves once every recorded fix has been handed to the watcher.
    pub async fn finished(&self) {
        let mut rx = self.state.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[async_trait]
impl LocationService for ReplayLocationService {
    async fn request_permissions(&self) -> Result<PermissionStatus, LocationError> {
        Ok(PermissionStatus::Granted)
    }

    async fn services_enabled(&self) -> bool {
        !self.fixes.is_empty()
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<LocationFix, LocationError> {
        let last = self.state.last.lock().map_err(|e| LocationError::Platform(e.to_string()))?;
        last.clone()
            .or_else(|| self.fixes.first().cloned())
            .ok_or_else(|| LocationError::Platform("replay track is empty".to_string()))
    }

    async fn last_known_position(&self) -> Result<Option<LocationFix>, LocationError> {
        let last = self.state.last.lock().map_err(|e| LocationError::Platform(e.to_string()))?;
        Ok(last.clone())
    }

    async fn watch_position(
        &self,
        options: SamplingOptions,
    ) -> Result<mpsc::Receiver<LocationFix>, LocationError> {
        debug!("Replay watch requested with {:?}", options);
        let (tx, rx) = mpsc::channel(32);
        let fixes = self.fixes.clone();
        let pace = self.pace;
        let state = self.state.clone();

        tokio::spawn(async move {
            for fix in fixes {
                tokio::time::sleep(pace).await;
                if let Ok(mut last) = state.last.lock() {
                    *last = Some(fix.clone());
                }
                if tx.send(fix).await.is_err() {
                    debug!("Replay watch cancelled");
                    break;
                }
            }
            state.finished.send_replace(true);
        });

        Ok(rx)
    }

    async fn start_background_updates(
        &self,
        task_id: &str,
        _options: SamplingOptions,
    ) -> Result<(), LocationError> {
        let mut tasks = self
            .state
            .background
            .lock()
            .map_err(|e| LocationError::Platform(e.to_string()))?;
        tasks.insert(task_id.to_string());
        Ok(())
    }

    async fn stop_background_updates(&self, task_id: &str) -> Result<(), LocationError> {
        let mut tasks = self
            .state
            .background
            .lock()
            .map_err(|e| LocationError::Platform(e.to_string()))?;
        tasks.remove(task_id);
        Ok(())
    }

    async fn has_started_background_updates(&self, task_id: &str) -> bool {
        self.state
            .background
            .lock()
            .map(|tasks| tasks.contains(task_id))
            .unwrap_or(false)
    }
}
