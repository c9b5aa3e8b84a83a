//! Pulling shipped logs off a server into the time-series sink

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ConsoleError;
use crate::orchestrator::context::Orchestrator;
use crate::orchestrator::filebeat::LOG_AGENT_PATH;
use crate::sink::{LogCursor, LogPoint, LOG_MEASUREMENT};
use crate::utils::shell_quote;

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("missing {}", what))
}

/// Normalize one line written by the shipping agent.
///
/// `None` for anything that is not a complete agent record; every skipped
/// line is logged with the reason. An empty `hostname` falls back to the
/// name the agent reported.
pub fn parse_log(line: &str, hostname: &str) -> Option<LogPoint> {
    match normalize_log(line, hostname) {
        Ok(point) => Some(point),
        Err(reason) => {
            warn!("unable to parse the log; reason={}", reason);
            None
        }
    }
}

/// Like [`parse_log`], with the reason a line was rejected
pub fn normalize_log(line: &str, hostname: &str) -> Result<LogPoint, String> {
    let record: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;

    let time = required(record.get("@timestamp").and_then(Value::as_str), "@timestamp")?;
    let time = DateTime::parse_from_rfc3339(time)
        .map_err(|e| format!("bad @timestamp {}: {}", time, e))?
        .with_timezone(&Utc);

    let fields = required(record.get("fields"), "fields")?;
    let gluu = required(fields.get("gluu"), "fields.gluu")?;
    let host = if hostname.is_empty() {
        required(text(record.pointer("/beat/hostname")), "beat.hostname")?
    } else {
        hostname.to_string()
    };

    let mut tags = BTreeMap::new();
    tags.insert("hostname".to_string(), host);
    tags.insert(
        "chroot".to_string(),
        required(text(gluu.get("chroot")), "fields.gluu.chroot")?,
    );
    tags.insert(
        "gluu_version".to_string(),
        required(text(gluu.get("version")), "fields.gluu.version")?,
    );
    for key in ["ip", "os", "type"] {
        let value = required(text(fields.get(key)), &format!("fields.{}", key))?;
        tags.insert(key.to_string(), value);
    }

    let mut values = BTreeMap::new();
    for key in ["message", "source"] {
        if let Some(v) = text(record.get(key)) {
            values.insert(key.to_string(), v);
        }
    }

    Ok(LogPoint {
        time,
        measurement: LOG_MEASUREMENT.to_string(),
        tags,
        fields: values,
    })
}

/// Remote command printing agent records newer than `cursor`
pub fn agent_command(cursor: Option<&LogCursor>, remote_log_path: &str) -> String {
    let (time, log_type) = cursor
        .map(|c| (c.time.as_str(), c.log_type.as_str()))
        .unwrap_or(("", ""));
    format!(
        "{} {} {} {}",
        LOG_AGENT_PATH,
        shell_quote(&format!("time:{}", time)),
        shell_quote(&format!("type:{}", log_type)),
        shell_quote(&format!("path:{}", remote_log_path)),
    )
}

impl Orchestrator {
    /// Collect new log records from one server; returns how many were written.
    ///
    /// Unparsable lines and an unreachable host only produce warnings. The
    /// batch is always handed to the sink in a single write.
    pub async fn collect_logs(
        &self,
        server_id: u64,
        remote_log_path: &str,
    ) -> Result<usize, ConsoleError> {
        let server = self.store.server(server_id).await?;
        let cursor = self.points.latest_cursor(&server.hostname).await?;
        let command = agent_command(cursor.as_ref(), remote_log_path);

        let mut points = Vec::new();
        match self.open_server(&server).await {
            Ok(session) => {
                let output = session.run(&command).await?;
                session.close().await?;

                if !output.stderr.trim().is_empty() {
                    warn!(
                        "Unable to collect logs from remote server {}/{}; reason={}",
                        server.hostname,
                        server.ip,
                        output.stderr.trim()
                    );
                } else {
                    points.extend(
                        output
                            .stdout
                            .lines()
                            .filter(|l| !l.trim().is_empty())
                            .filter_map(|l| parse_log(l, &server.hostname)),
                    );
                }
            }
            Err(e) => {
                warn!("Unable to collect logs from remote server; reason={}", e);
            }
        }

        debug!("{} log records parsed from {}", points.len(), server.hostname);
        self.points.write_points(&points).await
    }
}
