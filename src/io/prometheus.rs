//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_DOOR_LATENCY_BOUNDS_MS,
    METRICS_NUM_BUCKETS,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram with cumulative buckets; `sum` is approximated from the average
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_scan_metrics(&mut output, site_id, &summary);
    write_session_metrics(&mut output, site_id, &summary);
    write_door_metrics(&mut output, site_id, &summary);

    output
}

fn write_scan_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    use MetricType::{Counter, Gauge};

    write_metric(output, "open_house_scans_total", "Scans handled", Counter, site, s.scans_total);
    write_metric(
        output,
        "open_house_scans_ignored_total",
        "Scans from readers that are not facility doors",
        Counter,
        site,
        s.scans_ignored_total,
    );
    write_metric(
        output,
        "open_house_scans_malformed_total",
        "Protocol lines that could not be parsed",
        Counter,
        site,
        s.scans_malformed_total,
    );
    write_metric(
        output,
        "open_house_double_taps_total",
        "Scans that paired with an earlier tap",
        Counter,
        site,
        s.double_taps_total,
    );
    write_metric(
        output,
        "open_house_not_permitted_total",
        "Double taps by people without open house permission",
        Counter,
        site,
        s.not_permitted_total,
    );
    write_metric(
        output,
        "open_house_scan_buffer_len",
        "Scans currently held for correlation",
        Gauge,
        site,
        s.scan_buffer_len,
    );
    write_histogram(
        output,
        "open_house_scan_latency_us",
        "Scan handling latency in microseconds",
        site,
        &s.scan_lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        s.scan_lat_avg_us,
    );
}

fn write_session_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    use MetricType::{Counter, Gauge};

    write_metric(
        output,
        "open_house_active",
        "1 while an open house session is active",
        Gauge,
        site,
        s.session_active,
    );
    write_metric(
        output,
        "open_house_sessions_opened_total",
        "Sessions started by a double tap",
        Counter,
        site,
        s.sessions_opened_total,
    );
    write_metric(
        output,
        "open_house_sessions_closed_total",
        "Sessions ended by a double tap",
        Counter,
        site,
        s.sessions_closed_total,
    );
    write_metric(
        output,
        "open_house_sessions_expired_total",
        "Sessions ended by the window closing",
        Counter,
        site,
        s.sessions_expired_total,
    );
    write_metric(
        output,
        "open_house_no_window_total",
        "Authorized double taps outside every window",
        Counter,
        site,
        s.no_window_total,
    );
    write_metric(
        output,
        "open_house_maintenance_ticks_total",
        "Maintenance passes run",
        Counter,
        site,
        s.maintenance_ticks_total,
    );
}

fn write_door_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    use MetricType::{Counter, Gauge};

    write_metric(
        output,
        "open_house_door_cmds_total",
        "Door actuator calls",
        Counter,
        site,
        s.door_cmds_total,
    );
    write_metric(
        output,
        "open_house_door_cmd_failures_total",
        "Door actuator calls that failed",
        Counter,
        site,
        s.door_cmd_failures_total,
    );
    write_metric(
        output,
        "open_house_doors_not_found_total",
        "Door commands naming an unknown door",
        Counter,
        site,
        s.doors_not_found_total,
    );
    write_metric(
        output,
        "open_house_door_cmds_dropped_total",
        "Door commands dropped on a full queue",
        Counter,
        site,
        s.door_cmds_dropped,
    );
    write_metric(
        output,
        "open_house_door_latency_max_ms",
        "Slowest door actuator call since the last report",
        Gauge,
        site,
        s.door_lat_max_ms,
    );
    // Door latency has no tracked average; sum is left at zero
    write_histogram(
        output,
        "open_house_door_latency_ms",
        "Door actuator latency in milliseconds",
        site,
        &s.door_lat_buckets,
        &METRICS_DOOR_LATENCY_BOUNDS_MS,
        0,
    );
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let resp = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &site_id),
        ),
        (&Method::GET, "/health") => response(
            StatusCode::OK,
            "application/json",
            format!(r#"{{"ok":true,"open_house_active":{}}}"#, metrics.session_active()),
        ),
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    Ok(resp)
}

/// Start the Prometheus metrics HTTP server; port 0 disables it
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if port == 0 {
        info!("prometheus_metrics_server_disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, metrics.clone(), site_id.clone())
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_scan_processed(150);
        metrics.record_scan_processed(250);
        metrics.record_double_tap();
        metrics.record_session_opened();
        metrics.record_door_cmd(40, true);

        let output = format_prometheus_metrics(&metrics, "denhac");

        assert!(output.contains("open_house_scans_total{site=\"denhac\"} 2"));
        assert!(output.contains("open_house_scan_latency_us_bucket{site=\"denhac\""));
        assert!(output.contains("open_house_double_taps_total{site=\"denhac\"} 1"));
        assert!(output.contains("open_house_active{site=\"denhac\"} 1"));
        assert!(output.contains("open_house_door_latency_ms_count{site=\"denhac\"} 1"));
    }

    #[test]
    fn test_histogram_is_cumulative() {
        let mut output = String::new();
        let mut buckets = [0u64; METRICS_NUM_BUCKETS];
        buckets[0] = 2;
        buckets[3] = 1;
        buckets[METRICS_NUM_BUCKETS - 1] = 1;

        write_histogram(&mut output, "h", "help", "s", &buckets, &METRICS_BUCKET_BOUNDS, 10);

        assert!(output.contains("h_bucket{site=\"s\",le=\"+Inf\"} 4"));
        assert!(output.contains("h_count{site=\"s\"} 4"));
        assert!(output.contains("h_sum{site=\"s\"} 40"));
    }
}
