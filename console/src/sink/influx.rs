//! InfluxDB 1.x HTTP sink

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};
use url::Url;

use crate::errors::ConsoleError;
use crate::sink::{LogCursor, LogPoint, PointSink, LOG_MEASUREMENT};
use crate::storage::settings::InfluxSettings;

/// Sink writing line protocol to an InfluxDB database
pub struct InfluxSink {
    client: Client,
    base_url: Url,
    database: String,
    created: OnceCell<()>,
}

impl InfluxSink {
    pub fn new(settings: &InfluxSettings) -> Result<Self, ConsoleError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url(&settings.url)?,
            database: settings.database.clone(),
            created: OnceCell::new(),
        })
    }

    async fn query(&self, q: &str, with_db: bool) -> Result<QueryResponse, ConsoleError> {
        let url = self.endpoint("query")?;
        debug!("POST {} q={}", url, q);

        let mut params = vec![("q", q)];
        if with_db {
            params.push(("db", self.database.as_str()));
        }
        let response = self.client.post(url).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("InfluxDB query failed: {} - {}", status, body);
            return Err(ConsoleError::LogSinkError(format!("{}: {}", status, body)));
        }

        let body: QueryResponse = response.json().await?;
        if let Some(err) = body.results.iter().find_map(|r| r.error.as_ref()) {
            return Err(ConsoleError::LogSinkError(err.clone()));
        }
        Ok(body)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ConsoleError> {
        self.base_url
            .join(path)
            .map_err(|e| ConsoleError::ConfigError(format!("influxdb url: {}", e)))
    }

    async fn ensure_database(&self) -> Result<(), ConsoleError> {
        self.created
            .get_or_try_init(|| async {
                let q = format!("CREATE DATABASE \"{}\"", self.database);
                self.query(&q, false).await.map(|_| ())
            })
            .await?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl QueryResponse {
    /// First row of the first series, as a cursor
    fn cursor(&self) -> Option<LogCursor> {
        let series = self.results.first()?.series.first()?;
        let row = series.values.first()?;
        let column = |name: &str| -> String {
            series
                .columns
                .iter()
                .position(|c| c == name)
                .and_then(|i| row.get(i))
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };
        Some(LogCursor {
            time: column("time"),
            log_type: column("type"),
        })
    }
}

#[async_trait]
impl PointSink for InfluxSink {
    async fn latest_cursor(&self, hostname: &str) -> Result<Option<LogCursor>, ConsoleError> {
        self.ensure_database().await?;
        let q = format!(
            "SELECT * FROM {} WHERE hostname='{}' ORDER BY time DESC LIMIT 1",
            LOG_MEASUREMENT,
            hostname.replace('\\', "\\\\").replace('\'', "\\'")
        );
        Ok(self.query(&q, true).await?.cursor())
    }

    async fn write_points(&self, points: &[LogPoint]) -> Result<usize, ConsoleError> {
        let lines: Vec<String> = points.iter().filter_map(line_protocol).collect();
        if lines.len() < points.len() {
            warn!("{} point(s) without fields dropped", points.len() - lines.len());
        }
        if lines.is_empty() {
            return Ok(0);
        }
        self.ensure_database().await?;

        let url = self.endpoint("write")?;
        debug!("POST {} ({} points)", url, lines.len());
        let response = self
            .client
            .post(url)
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(lines.join("\n"))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("InfluxDB write failed: {} - {}", status, body);
            return Err(ConsoleError::LogSinkError(format!("{}: {}", status, body)));
        }
        Ok(lines.len())
    }
}

fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        if c == '\n' {
            out.push_str("\\n");
            continue;
        }
        out.push(c);
    }
    out
}

fn escape_field(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Parse the configured server url so relative endpoints join below it
fn base_url(raw: &str) -> Result<Url, ConsoleError> {
    let mut url = Url::parse(raw)
        .map_err(|e| ConsoleError::ConfigError(format!("invalid influxdb url {:?}: {}", raw, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Render one point; `None` when it has no fields
pub fn line_protocol(point: &LogPoint) -> Option<String> {
    if point.fields.is_empty() {
        return None;
    }

    let mut line = point.measurement.replace(',', "\\,").replace(' ', "\\ ");
    for (key, value) in &point.tags {
        // empty tag values are not representable
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    let fields: Vec<String> = point
        .fields
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", escape_key(k), escape_field(v)))
        .collect();
    line.push(' ');
    line.push_str(&fields.join(","));

    if let Some(ns) = point.time.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&ns.to_string());
    }
    Some(line)
}
