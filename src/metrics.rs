//! Process-local counters exposed in Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Upper bounds (ms) for the inference latency histogram. Completions from a
/// local model routinely take tens of seconds, so the buckets are wide.
const LATENCY_BUCKETS_MS: [u64; 10] = [
    100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000, 300_000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Analyze,
    Export,
}

impl Route {
    fn label(self) -> &'static str {
        match self {
            Route::Analyze => "analyze",
            Route::Export => "export",
        }
    }
}

pub struct Metrics {
    analyze_requests: AtomicU64,
    export_requests: AtomicU64,
    unauthorized: AtomicU64,
    bad_requests: AtomicU64,
    inference_failures: AtomicU64,
    markdown_reports: AtomicU64,
    pdf_reports: AtomicU64,
    latency_counts: Vec<AtomicU64>,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    start_epoch: f64,
    start_instant: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let start = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            analyze_requests: AtomicU64::new(0),
            export_requests: AtomicU64::new(0),
            unauthorized: AtomicU64::new(0),
            bad_requests: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            markdown_reports: AtomicU64::new(0),
            pdf_reports: AtomicU64::new(0),
            latency_counts: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            start_epoch: start.as_secs_f64(),
            start_instant: Instant::now(),
        }
    }

    pub fn record_request(&self, route: Route) {
        match route {
            Route::Analyze => self.analyze_requests.fetch_add(1, Ordering::Relaxed),
            Route::Export => self.export_requests.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_unauthorized(&self) {
        self.unauthorized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_failure(&self) {
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report(&self, pdf: bool) {
        if pdf {
            self.pdf_reports.fetch_add(1, Ordering::Relaxed);
        } else {
            self.markdown_reports.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn observe_inference_ms(&self, ms: u64) {
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        // first bucket >= value; larger values only land in +Inf
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| ms <= *ub) {
            self.latency_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn render(&self) -> String {
        let mut buf = String::new();

        writeln!(
            &mut buf,
            "# HELP exam_assist_requests_total Authenticated-route requests received\n# TYPE exam_assist_requests_total counter"
        )
        .ok();
        for (route, counter) in [
            (Route::Analyze, &self.analyze_requests),
            (Route::Export, &self.export_requests),
        ] {
            writeln!(
                &mut buf,
                "exam_assist_requests_total{{route=\"{}\"}} {}",
                route.label(),
                counter.load(Ordering::Relaxed)
            )
            .ok();
        }

        for (name, help, counter) in [
            (
                "exam_assist_unauthorized_total",
                "Requests rejected for a missing or wrong bearer token",
                &self.unauthorized,
            ),
            (
                "exam_assist_bad_requests_total",
                "Requests rejected for a missing or malformed body",
                &self.bad_requests,
            ),
            (
                "exam_assist_inference_failures_total",
                "Inference calls that failed or timed out",
                &self.inference_failures,
            ),
        ] {
            writeln!(&mut buf, "# HELP {} {}\n# TYPE {} counter", name, help, name).ok();
            writeln!(&mut buf, "{} {}", name, counter.load(Ordering::Relaxed)).ok();
        }

        writeln!(
            &mut buf,
            "# HELP exam_assist_reports_written_total Report files written\n# TYPE exam_assist_reports_written_total counter"
        )
        .ok();
        writeln!(
            &mut buf,
            "exam_assist_reports_written_total{{format=\"md\"}} {}",
            self.markdown_reports.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(
            &mut buf,
            "exam_assist_reports_written_total{{format=\"pdf\"}} {}",
            self.pdf_reports.load(Ordering::Relaxed)
        )
        .ok();

        writeln!(
            &mut buf,
            "# HELP exam_assist_inference_latency_ms Inference call latency histogram milliseconds\n# TYPE exam_assist_inference_latency_ms histogram"
        )
        .ok();
        let count = self.latency_count.load(Ordering::Relaxed);
        let mut cumulative: u64 = 0;
        for (i, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.latency_counts[i].load(Ordering::Relaxed);
            writeln!(
                &mut buf,
                "exam_assist_inference_latency_ms_bucket{{le=\"{}\"}} {}",
                ub, cumulative
            )
            .ok();
        }
        writeln!(
            &mut buf,
            "exam_assist_inference_latency_ms_bucket{{le=\"+Inf\"}} {}",
            count
        )
        .ok();
        writeln!(
            &mut buf,
            "exam_assist_inference_latency_ms_sum {}",
            self.latency_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(&mut buf, "exam_assist_inference_latency_ms_count {}", count).ok();

        writeln!(
            &mut buf,
            "# HELP exam_assist_build_info Build information\n# TYPE exam_assist_build_info gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "exam_assist_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP exam_assist_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE exam_assist_process_start_time_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "exam_assist_process_start_time_seconds {}",
            self.start_epoch
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP exam_assist_process_uptime_seconds Process uptime seconds\n# TYPE exam_assist_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "exam_assist_process_uptime_seconds {}",
            self.start_instant.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}
