// Request and generation metrics served at /metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use voice_core::{CacheStats, Lookup};

/// Latency samples kept for percentiles
const LATENCY_WINDOW: usize = 1000;

/// Per-endpoint counters and a sliding latency window
#[derive(Debug)]
pub struct EndpointMetrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    total_latency_ms: AtomicU64,
    min_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
    latency_samples: Mutex<VecDeque<u64>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            min_latency_ms: AtomicU64::new(u64::MAX),
            max_latency_ms: AtomicU64::new(0),
            latency_samples: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    pub fn record_request(&self, latency_ms: u64, failed: bool) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() == LATENCY_WINDOW {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    fn percentile(&self, p: usize) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        sorted[(sorted.len() * p / 100).min(sorted.len() - 1)]
    }

    pub fn snapshot(&self) -> EndpointStats {
        let count = self.request_count.load(Ordering::Relaxed);
        let avg_latency_ms = if count == 0 {
            0.0
        } else {
            self.total_latency_ms.load(Ordering::Relaxed) as f64 / count as f64
        };
        let min = self.min_latency_ms.load(Ordering::Relaxed);

        EndpointStats {
            request_count: count,
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms,
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcomes of successful generate calls, split by how the cache served them
#[derive(Debug, Default)]
pub struct GenerationMetrics {
    generation_count: AtomicU64,
    total_generation_time_ms: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    coalesced: AtomicU64,
    total_samples: AtomicU64,
}

impl GenerationMetrics {
    pub fn record(&self, time_ms: u64, sample_count: u64, lookup: Lookup) {
        self.generation_count.fetch_add(1, Ordering::Relaxed);
        self.total_generation_time_ms.fetch_add(time_ms, Ordering::Relaxed);
        self.total_samples.fetch_add(sample_count, Ordering::Relaxed);
        let counter = match lookup {
            Lookup::Hit => &self.cache_hits,
            Lookup::Computed => &self.cache_misses,
            Lookup::Joined => &self.coalesced,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GenerationMetricsResponse {
        let count = self.generation_count.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let coalesced = self.coalesced.load(Ordering::Relaxed);

        GenerationMetricsResponse {
            generation_count: count,
            avg_generation_time_ms: if count == 0 {
                0.0
            } else {
                self.total_generation_time_ms.load(Ordering::Relaxed) as f64 / count as f64
            },
            cache_hits: hits,
            cache_misses: misses,
            coalesced,
            cache_hit_rate: if count == 0 {
                0.0
            } else {
                hits as f64 / count as f64 * 100.0
            },
            total_samples: self.total_samples.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct AppMetrics {
    started: Instant,
    request_count: AtomicU64,
    pub generate: EndpointMetrics,
    pub generate_info: EndpointMetrics,
    pub generation: GenerationMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            request_count: AtomicU64::new(0),
            generate: EndpointMetrics::new(),
            generate_info: EndpointMetrics::new(),
            generation: GenerationMetrics::default(),
        }
    }

    pub fn count_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn report(&self, cache: CacheStats) -> DetailedMetricsResponse {
        DetailedMetricsResponse {
            timestamp: Utc::now(),
            system: SystemMetrics::collect(
                self.request_count.load(Ordering::Relaxed),
                self.uptime_seconds(),
            ),
            endpoints: EndpointMetricsResponse {
                generate: self.generate.snapshot(),
                generate_info: self.generate_info.snapshot(),
            },
            generation: self.generation.snapshot(),
            cache,
        }
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct DetailedMetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub endpoints: EndpointMetricsResponse,
    pub generation: GenerationMetricsResponse,
    pub cache: CacheStats,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    fn collect(request_count: u64, uptime_seconds: u64) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            request_count,
            uptime_seconds,
            system_load: load_average(),
        }
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}

#[derive(Serialize)]
pub struct EndpointMetricsResponse {
    pub generate: EndpointStats,
    pub generate_info: EndpointStats,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct GenerationMetricsResponse {
    pub generation_count: u64,
    pub avg_generation_time_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub coalesced: u64,
    pub cache_hit_rate: f64,
    pub total_samples: u64,
}
