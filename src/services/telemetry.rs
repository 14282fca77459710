//! Operation tracking and aggregate metrics
//!
//! Operations are tracked through explicit start/finish handles. Finished
//! operations stay queryable until the pruner drops them past the retention
//! age; a bounded history ring keeps the recent tail.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::AppState;

const ROLLING_SAMPLE_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle returned by `start_operation`; pass it back to finish or fail the
/// operation.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: String,
}

impl OperationHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Default)]
struct ToolStats {
    success: u64,
    error: u64,
    durations: VecDeque<f64>,
}

#[derive(Default)]
struct Inner {
    operations: HashMap<String, OperationRecord>,
    history: VecDeque<OperationRecord>,
    request_count: u64,
    operation_count: u64,
    error_count: u64,
    tool_stats: HashMap<String, ToolStats>,
    response_times: VecDeque<f64>,
}

pub struct Telemetry {
    inner: Mutex<Inner>,
    history_capacity: usize,
}

impl Telemetry {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            history_capacity,
        }
    }

    pub fn start_operation(&self, kind: &str, metadata: Value) -> OperationHandle {
        let id = Uuid::new_v4().to_string();
        let record = OperationRecord {
            id: id.clone(),
            kind: kind.to_string(),
            status: OperationStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            metadata,
            error: None,
        };

        let mut inner = self.inner.lock().expect("telemetry lock poisoned");
        inner.operation_count += 1;
        inner.operations.insert(id.clone(), record);
        debug!(operation_id = %id, kind = %kind, "operation started");
        OperationHandle { id }
    }

    pub fn finish_operation(&self, handle: &OperationHandle) {
        self.complete(handle, OperationStatus::Completed, None);
    }

    pub fn fail_operation(&self, handle: &OperationHandle, error: &str) {
        self.complete(handle, OperationStatus::Failed, Some(error.to_string()));
    }

    fn complete(&self, handle: &OperationHandle, status: OperationStatus, error: Option<String>) {
        let mut inner = self.inner.lock().expect("telemetry lock poisoned");
        if status == OperationStatus::Failed {
            inner.error_count += 1;
        }

        let Some(record) = inner.operations.get_mut(&handle.id) else {
            return;
        };
        let finished_at = Utc::now();
        let duration_ms = (finished_at - record.started_at).num_milliseconds();
        record.status = status;
        record.finished_at = Some(finished_at);
        record.duration_ms = Some(duration_ms);
        record.error = error;

        let snapshot = record.clone();
        push_capped(&mut inner.response_times, duration_ms as f64 / 1000.0);
        inner.history.push_back(snapshot);
        while inner.history.len() > self.history_capacity {
            inner.history.pop_front();
        }
    }

    pub fn record_request(&self) {
        self.inner
            .lock()
            .expect("telemetry lock poisoned")
            .request_count += 1;
    }

    pub fn record_tool_run(&self, tool: &str, duration_secs: f64, ok: bool) {
        let mut inner = self.inner.lock().expect("telemetry lock poisoned");
        let stats = inner.tool_stats.entry(tool.to_string()).or_default();
        if ok {
            stats.success += 1;
        } else {
            stats.error += 1;
        }
        push_capped(&mut stats.durations, duration_secs);
    }

    pub fn operation(&self, id: &str) -> Option<OperationRecord> {
        self.inner
            .lock()
            .expect("telemetry lock poisoned")
            .operations
            .get(id)
            .cloned()
    }

    /// Tracked operations, most recent first, optionally filtered by status.
    pub fn operations(
        &self,
        status: Option<OperationStatus>,
        limit: usize,
    ) -> Vec<OperationRecord> {
        let inner = self.inner.lock().expect("telemetry lock poisoned");
        let mut records: Vec<OperationRecord> = inner
            .operations
            .values()
            .filter(|record| status.is_none_or(|wanted| record.status == wanted))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        records
    }

    pub fn history(&self, limit: usize) -> Vec<OperationRecord> {
        let inner = self.inner.lock().expect("telemetry lock poisoned");
        inner.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn metrics(&self) -> Value {
        let inner = self.inner.lock().expect("telemetry lock poisoned");

        let times = &inner.response_times;
        let (avg, max, min) = if times.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                times.iter().sum::<f64>() / times.len() as f64,
                times.iter().cloned().fold(f64::MIN, f64::max),
                times.iter().cloned().fold(f64::MAX, f64::min),
            )
        };

        let tools: Value = inner
            .tool_stats
            .iter()
            .map(|(name, stats)| {
                let total = stats.success + stats.error;
                let success_rate = if total > 0 {
                    stats.success as f64 / total as f64
                } else {
                    0.0
                };
                let average_execution_time = if stats.durations.is_empty() {
                    0.0
                } else {
                    stats.durations.iter().sum::<f64>() / stats.durations.len() as f64
                };
                (
                    name.clone(),
                    json!({
                        "execution_count": total,
                        "success_rate": success_rate,
                        "average_execution_time": average_execution_time,
                    }),
                )
            })
            .collect::<serde_json::Map<String, Value>>()
            .into();

        let active = inner
            .operations
            .values()
            .filter(|record| record.status == OperationStatus::Running)
            .count();

        json!({
            "request_count": inner.request_count,
            "operation_count": inner.operation_count,
            "error_count": inner.error_count,
            "active_operations": active,
            "avg_response_time": avg,
            "max_response_time": max,
            "min_response_time": min,
            "tools": tools,
        })
    }

    /// Drop finished operations older than `max_age`. Running operations are
    /// never pruned.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut inner = self.inner.lock().expect("telemetry lock poisoned");
        let before = inner.operations.len();
        inner.operations.retain(|_, record| {
            record.status == OperationStatus::Running || record.started_at >= cutoff
        });
        before - inner.operations.len()
    }
}

fn push_capped(samples: &mut VecDeque<f64>, value: f64) {
    if samples.len() >= ROLLING_SAMPLE_CAP {
        samples.pop_front();
    }
    samples.push_back(value);
}

/// Track every HTTP request as an operation. Health and telemetry reads are
/// skipped to keep the metrics from feeding on themselves.
pub async fn telemetry_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path == "/health" || path.starts_with("/telemetry") {
        return next.run(request).await;
    }

    state.telemetry.record_request();
    let handle = state.telemetry.start_operation(
        "http_request",
        json!({
            "method": request.method().as_str(),
            "path": path,
        }),
    );

    let response = next.run(request).await;

    if response.status().is_server_error() {
        state
            .telemetry
            .fail_operation(&handle, &format!("status {}", response.status().as_u16()));
    } else {
        state.telemetry.finish_operation(&handle);
    }
    response
}

/// Periodically drop finished operations past the retention age.
pub async fn run_telemetry_pruner(
    telemetry: Arc<Telemetry>,
    every: std::time::Duration,
    retention: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let removed = telemetry.prune_finished(retention);
        if removed > 0 {
            info!(removed, "pruned finished operations");
        }
    }
}
