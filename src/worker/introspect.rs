use std::time::Duration;

use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::scheduler::capability::{JobIntrospector, PartialDecode};

const TYPE_KEY: &str = "type";
const TIMEOUT_KEY: &str = "timeout_secs";
const ENVELOPE_KEY: &str = "body";
const UNKNOWN_TYPE: &str = "unknown";

/// Introspection for jobs carried as JSON objects.
///
/// A job looks like `{"type": "scan", "timeout_secs": 30, "command": "..."}`.
/// An object whose only key is `body` is a transport envelope around such a job.
#[derive(Debug, Clone)]
pub struct JsonJobIntrospector {
    default_timeout: Duration,
}

impl Default for JsonJobIntrospector {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl JsonJobIntrospector {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    fn inner<'a>(&self, job: &'a Value) -> &'a Value {
        match job.as_object() {
            Some(map) if map.len() == 1 && map.contains_key(ENVELOPE_KEY) => &map[ENVELOPE_KEY],
            _ => job,
        }
    }
}

fn require_object(value: Value) -> Result<Value> {
    if value.is_object() {
        Ok(value)
    } else {
        Err(SchedulerError::Decode(format!(
            "job must be a JSON object, got {}",
            value
        )))
    }
}

impl JobIntrospector<Value> for JsonJobIntrospector {
    fn decode_jobs(&self, raw: &[Value]) -> Result<Vec<Value>> {
        raw.iter().cloned().map(require_object).collect()
    }

    /// Reads a stream of JSON values; each is a job object or an array of them.
    /// Stops at the first malformed value, keeping what came before.
    fn decode_jobs_from_bytes(
        &self,
        bytes: &[u8],
    ) -> std::result::Result<Vec<Value>, PartialDecode<Value>> {
        let mut jobs = Vec::new();
        for value in serde_json::Deserializer::from_slice(bytes).into_iter::<Value>() {
            let value = match value {
                Ok(value) => value,
                Err(e) => return Err(PartialDecode::new(jobs, e.into())),
            };
            let items = match value {
                Value::Array(items) => items,
                other => vec![other],
            };
            for item in items {
                match require_object(item) {
                    Ok(job) => jobs.push(job),
                    Err(e) => return Err(PartialDecode::new(jobs, e)),
                }
            }
        }
        Ok(jobs)
    }

    fn encode_job(&self, job: &Value) -> Result<Value> {
        Ok(job.clone())
    }

    fn timeout_for(&self, job: &Value) -> Duration {
        let inner = self.inner(job);
        match inner.get(TIMEOUT_KEY) {
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(self.default_timeout),
            _ => self.default_timeout,
        }
    }

    fn type_name_for(&self, job: &Value) -> String {
        self.inner(job)
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_TYPE)
            .to_string()
    }

    fn unwrap(&self, job: &Value) -> Value {
        self.inner(job).clone()
    }
}
