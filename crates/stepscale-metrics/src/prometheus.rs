//! Prometheus-backed metrics source.
//!
//! Issues one `query_range` per cycle for all entities of a target. The
//! query divides each pod's CPU usage rate by its CPU request, giving a
//! utilization ratio that is scaled to an integer percentage.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::{MetricsError, MetricsResult};
use crate::source::{EntitySeries, MetricsSource, UtilizationSample};

/// Resolution of the range query, one point per minute.
const STEP_SECS: u64 = 60;

/// Label carrying the entity name in the query result.
const ENTITY_LABEL: &str = "pod";

/// Queries a Prometheus HTTP API (plain `http://` only).
#[derive(Debug, Clone)]
pub struct PrometheusSource {
    /// `host:port` to connect to.
    authority: String,
    /// Path prefix the API is mounted under, without trailing slash.
    path_prefix: String,
    timeout: Duration,
}

impl PrometheusSource {
    /// Create a source for a base URL such as `http://prometheus:9090`.
    pub fn new(base_url: &str, timeout: Duration) -> MetricsResult<Self> {
        let invalid = |reason: &str| MetricsError::InvalidUrl {
            url: base_url.to_string(),
            reason: reason.to_string(),
        };

        let uri: http::Uri = base_url.parse().map_err(|_| invalid("not a valid URI"))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(_) => return Err(invalid("only http:// is supported")),
            None => return Err(invalid("missing scheme")),
        }
        let host = uri.host().ok_or_else(|| invalid("missing host"))?;
        let port = uri.port_u16().unwrap_or(80);

        Ok(Self {
            authority: format!("{host}:{port}"),
            path_prefix: uri.path().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Build the `query_range` request path for the given entities and window.
    fn request_path(&self, namespace: &str, entities: &[String], window: u32, now: u64) -> String {
        let query = utilization_query(namespace, entities);
        let end = now - now % STEP_SECS;
        let start = end.saturating_sub(STEP_SECS * u64::from(window.saturating_sub(1)));
        let params = serde_urlencoded::to_string([
            ("query", query),
            ("start", start.to_string()),
            ("end", end.to_string()),
            ("step", format!("{STEP_SECS}s")),
        ])
        .unwrap_or_default();
        format!("{}/api/v1/query_range?{params}", self.path_prefix)
    }

    async fn get(&self, path_and_query: &str) -> MetricsResult<(u16, bytes::Bytes)> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| MetricsError::Connect {
                address: self.authority.clone(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| MetricsError::Request(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path_and_query)
            .header("host", &self.authority)
            .header("accept", "application/json")
            .header("user-agent", "stepscale/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| MetricsError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| MetricsError::Request(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| MetricsError::Request(e.to_string()))?
            .to_bytes();
        Ok((status, body))
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query(
        &self,
        namespace: &str,
        entities: &[String],
        window: u32,
    ) -> MetricsResult<EntitySeries> {
        if entities.is_empty() || window == 0 {
            return Ok(EntitySeries::new());
        }

        let path = self.request_path(namespace, entities, window, epoch_secs());
        debug!(%namespace, entities = entities.len(), window, "querying prometheus");

        let (status, body) = tokio::time::timeout(self.timeout, self.get(&path))
            .await
            .map_err(|_| MetricsError::Timeout(self.timeout))??;

        if !(200..300).contains(&status) {
            return Err(MetricsError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let series = parse_matrix(&body)?;
        debug!(%namespace, returned = series.len(), "prometheus query complete");
        Ok(series)
    }
}

/// Utilization of each entity as a ratio of its CPU request.
fn utilization_query(namespace: &str, entities: &[String]) -> String {
    let names = entities
        .iter()
        .map(|e| e.replace('.', "\\."))
        .collect::<Vec<_>>()
        .join("|");
    let names = quote_escape(&names);
    let namespace = quote_escape(namespace);
    format!(
        "sum(rate(container_cpu_usage_seconds_total{{{ENTITY_LABEL}=~\"{names}\", namespace=\"{namespace}\"}}[1m])) by ({ENTITY_LABEL}) / \
         sum(kube_pod_container_resource_requests_cpu_cores{{{ENTITY_LABEL}=~\"{names}\", namespace=\"{namespace}\"}}) by ({ENTITY_LABEL})"
    )
}

/// Escape a value for a double-quoted PromQL string.
fn quote_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct MatrixSeries {
    metric: HashMap<String, String>,
    values: Vec<(f64, String)>,
}

/// Decode a `query_range` response into per-entity percentage series.
fn parse_matrix(body: &[u8]) -> MetricsResult<EntitySeries> {
    let resp: QueryResponse =
        serde_json::from_slice(body).map_err(|e| MetricsError::Decode(e.to_string()))?;
    if resp.status != "success" {
        return Err(MetricsError::UnexpectedResult(
            resp.error.unwrap_or_else(|| resp.status.clone()),
        ));
    }
    let data = resp
        .data
        .ok_or_else(|| MetricsError::UnexpectedResult("missing data".to_string()))?;
    if data.result_type != "matrix" {
        return Err(MetricsError::UnexpectedResult(format!(
            "expected matrix, got {}",
            data.result_type
        )));
    }
    let matrix: Vec<MatrixSeries> =
        serde_json::from_value(data.result).map_err(|e| MetricsError::Decode(e.to_string()))?;

    let mut series = EntitySeries::new();
    for s in matrix {
        let Some(entity) = s.metric.get(ENTITY_LABEL) else {
            continue;
        };
        let mut samples = Vec::with_capacity(s.values.len());
        for (ts, raw) in &s.values {
            let ratio: f64 = raw
                .parse()
                .map_err(|_| MetricsError::Decode(format!("bad sample value {raw:?}")))?;
            if !ratio.is_finite() {
                // Division by a zero request; no usable point.
                continue;
            }
            samples.push(UtilizationSample {
                timestamp: *ts as u64,
                value: (ratio * 100.0).max(0.0) as u32,
            });
        }
        series.insert(entity.clone(), samples);
    }
    Ok(series)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
