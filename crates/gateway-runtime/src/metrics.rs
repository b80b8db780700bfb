// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Request metrics aggregation and Prometheus text exposition
//!
//! Every completed request is recorded once through
//! [`MetricsAggregator::observe`]. Existing series are found by borrowed
//! method and route under a shared read lock and updated with atomic
//! increments; the maps are write-locked just long enough to insert a series
//! the first time it is seen. [`MetricsAggregator::snapshot`] renders the
//! Prometheus text format (version 0.0.4), sorted by label set so scrapes are
//! reproducible.

use std::{
    collections::BTreeMap,
    fmt::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;

use crate::{config::MetricsConfig, error::RuntimeResult};

/// Route label used for requests that matched no route template
pub const UNKNOWN_ROUTE: &str = "unknown";

/// Content type of the exposition returned by [`MetricsAggregator::snapshot`]
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const REQUESTS_TOTAL: &str = "http_requests_total";
const REQUEST_DURATION: &str = "http_request_duration_seconds";
const REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";
const RESPONSE_BYTES_TOTAL: &str = "http_response_bytes_total";

/// Pick the route label for a request, falling back to [`UNKNOWN_ROUTE`]
///
/// Only matched route templates are used as labels; raw paths would create
/// one series per path parameter value.
pub fn route_label(matched_route: Option<&str>) -> &str {
    match matched_route {
        Some(route) if !route.is_empty() => route,
        _ => UNKNOWN_ROUTE,
    }
}

// method -> route -> value, so lookups borrow `&str` and iteration is sorted
type Series<T> = BTreeMap<String, BTreeMap<String, T>>;

#[derive(Debug)]
struct Histogram {
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_nanos: AtomicU64,
}

impl Histogram {
    fn new(bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
        }
    }

    // Count is written before the buckets (highest first) and read after them
    // (lowest first), so a scrape never sees a bucket above +Inf or a
    // decreasing cumulative sequence.
    fn observe(&self, bounds_nanos: &[u64], nanos: u64) {
        self.count.fetch_add(1, Ordering::SeqCst);
        // Saturates instead of wrapping
        let _ = self
            .sum_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |sum| {
                Some(sum.saturating_add(nanos))
            });
        for (bucket, bound) in self.buckets.iter().zip(bounds_nanos).rev() {
            if nanos <= *bound {
                bucket.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Decrements the in-flight gauge when dropped
///
/// Dropping happens on every exit path of the request future, including
/// errors, panics and cancellation.
#[derive(Debug)]
#[must_use = "the in-flight gauge is decremented as soon as the guard is dropped"]
pub struct ActiveRequestGuard {
    in_flight: Arc<AtomicI64>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Concurrent aggregator for per-request counters and latency histograms
#[derive(Debug)]
pub struct MetricsAggregator {
    bounds: Vec<f64>,
    bounds_nanos: Vec<u64>,
    counters: RwLock<Series<BTreeMap<u16, AtomicU64>>>,
    histograms: RwLock<Series<Histogram>>,
    in_flight: Arc<AtomicI64>,
    response_bytes: AtomicU64,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::with_bounds(MetricsConfig::default().buckets)
    }
}

impl MetricsAggregator {
    /// Create an aggregator with the configured histogram boundaries
    ///
    /// # Errors
    ///
    /// Returns an error if the boundaries are empty, not positive or not
    /// strictly ascending.
    pub fn new(config: MetricsConfig) -> RuntimeResult<Self> {
        config.validate()?;
        Ok(Self::with_bounds(config.buckets))
    }

    fn with_bounds(bounds: Vec<f64>) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bounds_nanos = bounds
            .iter()
            .map(|seconds| (seconds * 1e9).round() as u64)
            .collect();

        Self {
            bounds,
            bounds_nanos,
            counters: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            in_flight: Arc::new(AtomicI64::new(0)),
            response_bytes: AtomicU64::new(0),
        }
    }

    /// Mark a request as started; the returned guard marks it finished
    pub fn track_request(&self) -> ActiveRequestGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ActiveRequestGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Record one completed request
    pub fn observe(
        &self,
        method: &str,
        route: &str,
        status: u16,
        duration: Duration,
        response_bytes: u64,
    ) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let route = route_label(Some(route));

        self.count_status(method, route, status);
        self.record_latency(method, route, nanos);
        self.response_bytes
            .fetch_add(response_bytes, Ordering::Relaxed);
    }

    /// Requests currently in flight
    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Histogram boundaries in seconds
    pub fn buckets(&self) -> &[f64] {
        &self.bounds
    }

    fn count_status(&self, method: &str, route: &str, status: u16) {
        if let Some(counter) = self
            .counters
            .read()
            .get(method)
            .and_then(|routes| routes.get(route))
            .and_then(|statuses| statuses.get(&status))
        {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(method.to_owned())
            .or_default()
            .entry(route.to_owned())
            .or_default()
            .entry(status)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, method: &str, route: &str, nanos: u64) {
        if let Some(histogram) = self
            .histograms
            .read()
            .get(method)
            .and_then(|routes| routes.get(route))
        {
            histogram.observe(&self.bounds_nanos, nanos);
            return;
        }
        let bucket_count = self.bounds_nanos.len();
        self.histograms
            .write()
            .entry(method.to_owned())
            .or_default()
            .entry(route.to_owned())
            .or_insert_with(|| Histogram::new(bucket_count))
            .observe(&self.bounds_nanos, nanos);
    }

    /// Render every metric in Prometheus text format
    pub fn snapshot(&self) -> String {
        let mut out = String::with_capacity(4096);
        // Writing into a String cannot fail
        let _ = self.write_exposition(&mut out);
        out
    }

    fn write_exposition(&self, out: &mut String) -> fmt::Result {
        write_family_header(
            out,
            REQUESTS_TOTAL,
            "Total number of HTTP requests processed.",
            "counter",
        )?;
        for (method, routes) in self.counters.read().iter() {
            for (route, statuses) in routes {
                let labels = series_labels(method, route);
                for (status, counter) in statuses {
                    writeln!(
                        out,
                        "{REQUESTS_TOTAL}{{{labels},status=\"{status}\"}} {}",
                        counter.load(Ordering::Relaxed)
                    )?;
                }
            }
        }

        write_family_header(
            out,
            REQUEST_DURATION,
            "HTTP request latency in seconds.",
            "histogram",
        )?;
        let histograms = self.histograms.read();
        let series = histograms.iter().flat_map(|(method, routes)| {
            routes
                .iter()
                .map(move |(route, histogram)| (method, route, histogram))
        });
        for (method, route, histogram) in series {
            let labels = series_labels(method, route);
            for (bound, bucket) in self.bounds.iter().zip(&histogram.buckets) {
                writeln!(
                    out,
                    "{REQUEST_DURATION}_bucket{{{labels},le=\"{bound}\"}} {}",
                    bucket.load(Ordering::SeqCst)
                )?;
            }
            let sum = histogram.sum_nanos.load(Ordering::SeqCst);
            let count = histogram.count.load(Ordering::SeqCst);
            writeln!(
                out,
                "{REQUEST_DURATION}_bucket{{{labels},le=\"+Inf\"}} {count}"
            )?;
            writeln!(
                out,
                "{REQUEST_DURATION}_sum{{{labels}}} {}",
                format_seconds(sum)
            )?;
            writeln!(out, "{REQUEST_DURATION}_count{{{labels}}} {count}")?;
        }

        write_family_header(
            out,
            REQUESTS_IN_FLIGHT,
            "Number of HTTP requests currently being served.",
            "gauge",
        )?;
        writeln!(out, "{REQUESTS_IN_FLIGHT} {}", self.in_flight())?;

        write_family_header(
            out,
            RESPONSE_BYTES_TOTAL,
            "Total number of response body bytes sent.",
            "counter",
        )?;
        writeln!(
            out,
            "{RESPONSE_BYTES_TOTAL} {}",
            self.response_bytes.load(Ordering::Relaxed)
        )
    }
}

fn write_family_header(out: &mut String, name: &str, help: &str, kind: &str) -> fmt::Result {
    writeln!(out, "# HELP {name} {help}")?;
    writeln!(out, "# TYPE {name} {kind}")
}

fn series_labels(method: &str, route: &str) -> String {
    format!(
        "method=\"{}\",route=\"{}\"",
        escape_label_value(method),
        escape_label_value(route)
    )
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Seconds with exactly six decimal places, rounded to the microsecond
fn format_seconds(nanos: u64) -> String {
    let micros = nanos.saturating_add(500) / 1_000;
    format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000)
}
