use std::env;
use std::time::Duration;

use anyhow::{ensure, Result};
use tracing::warn;

use crate::constants::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_POOL_SIZE,
    DEFAULT_METRICS_INTERVAL_SECS, DEFAULT_PAGE_SIZE, DEFAULT_SCROLL_THRESHOLD,
};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub debounce: Duration,
    pub scroll_threshold: f64,
    pub fetch_timeout: Duration,
    pub page_size: u32,
    pub max_pool_size: usize,
    /// Zero disables the periodic metrics log line.
    pub metrics_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            scroll_threshold: DEFAULT_SCROLL_THRESHOLD,
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            page_size: DEFAULT_PAGE_SIZE,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            metrics_interval: Duration::from_secs(DEFAULT_METRICS_INTERVAL_SECS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let debounce = Duration::from_millis(
            env::var("RANK_WINDOW_DEBOUNCE_MS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(DEFAULT_DEBOUNCE_MS),
        );

        let scroll_threshold = env::var("RANK_WINDOW_SCROLL_THRESHOLD")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(DEFAULT_SCROLL_THRESHOLD);
        let scroll_threshold = if (0.0..=1.0).contains(&scroll_threshold) {
            scroll_threshold
        } else {
            warn!(
                scroll_threshold,
                "RANK_WINDOW_SCROLL_THRESHOLD outside [0, 1]; using default"
            );
            DEFAULT_SCROLL_THRESHOLD
        };

        let fetch_timeout = Duration::from_millis(
            env::var("RANK_WINDOW_FETCH_TIMEOUT_MS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_MS),
        );

        let page_size = env::var("RANK_WINDOW_PAGE_SIZE")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_PAGE_SIZE);
        ensure!(page_size >= 1, "RANK_WINDOW_PAGE_SIZE must be at least 1");

        let max_pool_size = env::var("RANK_WINDOW_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        ensure!(
            max_pool_size >= 1,
            "RANK_WINDOW_MAX_POOL_SIZE must be at least 1"
        );

        let metrics_interval = Duration::from_secs(
            env::var("RANK_WINDOW_METRICS_INTERVAL_SECS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(DEFAULT_METRICS_INTERVAL_SECS),
        );

        Ok(Self {
            debounce,
            scroll_threshold,
            fetch_timeout,
            page_size,
            max_pool_size,
            metrics_interval,
        })
    }
}
