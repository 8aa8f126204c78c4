use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide counters exposed on `/metrics`.
#[derive(Default)]
pub struct ServiceMetrics {
    pub requests_2xx: AtomicU64,
    pub requests_3xx: AtomicU64,
    pub requests_4xx: AtomicU64,
    pub requests_5xx: AtomicU64,
    pub requests_in_flight: AtomicI64,
    /// Sum of request durations in microseconds.
    pub request_duration_us: AtomicU64,
    pub jobs_enqueued: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
}

impl ServiceMetrics {
    pub fn request_started(&self) {
        self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_finished(&self, status: u16, elapsed: std::time::Duration) {
        self.requests_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.request_duration_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        let counter = match status {
            200..=299 => &self.requests_2xx,
            300..=399 => &self.requests_3xx,
            400..=499 => &self.requests_4xx,
            _ => &self.requests_5xx,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Serialize to Prometheus text exposition format.
    pub fn to_prometheus_text(&self) -> String {
        let r2 = self.requests_2xx.load(Ordering::Relaxed);
        let r3 = self.requests_3xx.load(Ordering::Relaxed);
        let r4 = self.requests_4xx.load(Ordering::Relaxed);
        let r5 = self.requests_5xx.load(Ordering::Relaxed);
        let total = r2 + r3 + r4 + r5;
        let in_flight = self.requests_in_flight.load(Ordering::Relaxed);
        let duration = self.request_duration_us.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let enqueued = self.jobs_enqueued.load(Ordering::Relaxed);
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        let failed = self.jobs_failed.load(Ordering::Relaxed);

        format!(
            "# HELP opsdesk_http_requests_total HTTP requests served, by status class\n\
             # TYPE opsdesk_http_requests_total counter\n\
             opsdesk_http_requests_total{{status=\"2xx\"}} {r2}\n\
             opsdesk_http_requests_total{{status=\"3xx\"}} {r3}\n\
             opsdesk_http_requests_total{{status=\"4xx\"}} {r4}\n\
             opsdesk_http_requests_total{{status=\"5xx\"}} {r5}\n\
             # HELP opsdesk_http_requests_in_flight Requests currently being handled\n\
             # TYPE opsdesk_http_requests_in_flight gauge\n\
             opsdesk_http_requests_in_flight {in_flight}\n\
             # HELP opsdesk_http_request_duration_seconds Time spent handling requests\n\
             # TYPE opsdesk_http_request_duration_seconds summary\n\
             opsdesk_http_request_duration_seconds_sum {duration}\n\
             opsdesk_http_request_duration_seconds_count {total}\n\
             # HELP opsdesk_jobs_total Background jobs, by outcome\n\
             # TYPE opsdesk_jobs_total counter\n\
             opsdesk_jobs_total{{state=\"enqueued\"}} {enqueued}\n\
             opsdesk_jobs_total{{state=\"completed\"}} {completed}\n\
             opsdesk_jobs_total{{state=\"failed\"}} {failed}\n"
        )
    }
}
