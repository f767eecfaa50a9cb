//! Event records for recorded task traces.
//!
//! A record is `{"name", "timestamp", "relative_time", "data"}` on disk.
//! Known names decode into [`EventKind`]; unknown names are kept as
//! [`EventPayload::Custom`]. A record that cannot be decoded at all is kept
//! verbatim as [`EventPayload::Raw`] so one bad entry never takes down a
//! whole trace.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

/// Kind of the event that opens a round. Replay pauses here for confirmation.
pub const ROUND_START: &str = "round_start";
/// Kind of the event that closes a round.
pub const ROUND_END: &str = "round_end";

/// One timestamped occurrence in a task trace.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Seconds since the UNIX epoch at record time. `0.0` when the stored
    /// record carried no usable timestamp; see [`EventRecord::recorded_at`].
    pub timestamp: f64,
    /// Seconds since the task started, when the recorder tracked it.
    pub relative_time: Option<f64>,
    pub payload: EventPayload,
    stamped: bool,
}

/// Decoded body of an [`EventRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Known(EventKind),
    /// Well-formed record with a name this crate does not know.
    Custom {
        name: String,
        data: Map<String, Value>,
    },
    /// Record that failed to decode; `raw` is exactly what was stored.
    Raw { raw: Value, error: String },
}

/// Event kinds emitted by the task runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    TaskStart {
        instruction: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    RoundStart {
        round: u32,
        #[serde(default)]
        instruction: String,
    },
    RoundEnd {
        round: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
    },
    ResponseComplete {
        #[serde(default)]
        llm: String,
        content: String,
    },
    ToolCall {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolResult {
        name: String,
        #[serde(default)]
        result: Value,
    },
    Exec {
        block: Value,
    },
    ExecResult {
        block: Value,
        #[serde(default)]
        result: Value,
    },
    Exception {
        msg: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exception: Option<String>,
    },
    TaskEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl EventKind {
    /// Names with a typed variant.
    pub const KNOWN: [&'static str; 10] = [
        "task_start",
        ROUND_START,
        ROUND_END,
        "response_complete",
        "tool_call",
        "tool_result",
        "exec",
        "exec_result",
        "exception",
        "task_end",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskStart { .. } => "task_start",
            Self::RoundStart { .. } => ROUND_START,
            Self::RoundEnd { .. } => ROUND_END,
            Self::ResponseComplete { .. } => "response_complete",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Exec { .. } => "exec",
            Self::ExecResult { .. } => "exec_result",
            Self::Exception { .. } => "exception",
            Self::TaskEnd { .. } => "task_end",
        }
    }

    pub fn is_known(name: &str) -> bool {
        Self::KNOWN.contains(&name)
    }
}

impl EventRecord {
    /// Current wall-clock time in seconds since the UNIX epoch.
    pub fn now_seconds() -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }

    /// Record `kind` with the current wall-clock time.
    pub fn new(kind: EventKind) -> Self {
        Self::at(kind, Self::now_seconds())
    }

    /// Record `kind` at an explicit timestamp (seconds).
    pub fn at(kind: EventKind, timestamp: f64) -> Self {
        Self {
            timestamp,
            relative_time: None,
            payload: EventPayload::Known(kind),
            stamped: true,
        }
    }

    pub fn custom(name: impl Into<String>, data: Map<String, Value>, timestamp: f64) -> Self {
        Self {
            timestamp,
            relative_time: None,
            payload: EventPayload::Custom {
                name: name.into(),
                data,
            },
            stamped: true,
        }
    }

    pub fn with_relative_time(mut self, relative_time: f64) -> Self {
        self.relative_time = Some(relative_time);
        self
    }

    /// Stable kind string. Raw records report their stored `name` when it is
    /// a string, so checkpoint detection survives a malformed payload.
    pub fn kind(&self) -> &str {
        match &self.payload {
            EventPayload::Known(kind) => kind.name(),
            EventPayload::Custom { name, .. } => name.as_str(),
            EventPayload::Raw { raw, .. } => raw
                .get("name")
                .or_else(|| raw.get("kind"))
                .and_then(Value::as_str)
                .unwrap_or("raw"),
        }
    }

    /// The stored timestamp, or `None` when the record had none and
    /// [`Self::timestamp`] is only the `0.0` default.
    pub fn recorded_at(&self) -> Option<f64> {
        self.stamped.then_some(self.timestamp)
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind() == kind
    }

    /// False when the record was kept in raw form.
    pub fn is_decoded(&self) -> bool {
        !matches!(self.payload, EventPayload::Raw { .. })
    }

    pub fn decode_error(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Raw { error, .. } => Some(error.as_str()),
            _ => None,
        }
    }

    /// Round number carried by round events, read loosely for untyped records.
    pub fn round(&self) -> Option<u32> {
        match &self.payload {
            EventPayload::Known(EventKind::RoundStart { round, .. })
            | EventPayload::Known(EventKind::RoundEnd { round, .. }) => Some(*round),
            EventPayload::Known(_) => None,
            _ => self
                .loose_field("round")
                .and_then(Value::as_u64)
                .and_then(|round| u32::try_from(round).ok()),
        }
    }

    /// Instruction text carried by task/round start events.
    pub fn instruction(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Known(EventKind::RoundStart { instruction, .. })
            | EventPayload::Known(EventKind::TaskStart { instruction, .. }) => {
                Some(instruction.as_str())
            }
            EventPayload::Known(_) => None,
            _ => self.loose_field("instruction").and_then(Value::as_str),
        }
    }

    fn loose_field(&self, key: &str) -> Option<&Value> {
        match &self.payload {
            EventPayload::Custom { data, .. } => data.get(key),
            EventPayload::Raw { raw, .. } => raw
                .get("data")
                .or_else(|| raw.get("payload"))
                .and_then(|data| data.get(key)),
            EventPayload::Known(_) => None,
        }
    }

    /// Decode a stored record, keeping it raw when it does not fit the model.
    pub fn from_value(value: Value) -> Self {
        match Self::decode(&value) {
            Ok(record) => record,
            Err(error) => Self::raw(value, error),
        }
    }

    /// Strict decode; the error names the first field that did not fit.
    pub fn decode(value: &Value) -> Result<Self, String> {
        let Some(obj) = value.as_object() else {
            return Err(format!("expected an object, found {}", json_type(value)));
        };

        let name = match obj.get("name").or_else(|| obj.get("kind")) {
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(format!(
                    "field `name` must be a string, found {}",
                    json_type(other)
                ));
            }
            None => return Err("missing field `name`".to_owned()),
        };
        let timestamp = optional_f64(obj, "timestamp")?;
        let relative_time = optional_f64(obj, "relative_time")?;
        let data = match obj.get("data").or_else(|| obj.get("payload")) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(data)) => data.clone(),
            Some(other) => {
                return Err(format!(
                    "field `data` must be an object, found {}",
                    json_type(other)
                ));
            }
        };

        let payload = if EventKind::is_known(&name) {
            let tagged = json!({ "name": name, "data": Value::Object(data) });
            let kind = serde_json::from_value(tagged)
                .map_err(|e| format!("invalid `{name}` payload: {e}"))?;
            EventPayload::Known(kind)
        } else {
            EventPayload::Custom { name, data }
        };

        Ok(Self {
            timestamp: timestamp.unwrap_or(0.0),
            relative_time,
            payload,
            stamped: timestamp.is_some(),
        })
    }

    fn raw(raw: Value, error: String) -> Self {
        let timestamp = raw.get("timestamp").and_then(Value::as_f64);
        let relative_time = raw.get("relative_time").and_then(Value::as_f64);
        Self {
            timestamp: timestamp.unwrap_or(0.0),
            relative_time,
            payload: EventPayload::Raw { raw, error },
            stamped: timestamp.is_some(),
        }
    }

    /// Canonical stored form. Raw records come back exactly as they were read.
    pub fn to_value(&self) -> Value {
        let (name, data) = match &self.payload {
            EventPayload::Raw { raw, .. } => return raw.clone(),
            EventPayload::Custom { name, data } => (name.clone(), Value::Object(data.clone())),
            EventPayload::Known(kind) => {
                let data = serde_json::to_value(kind)
                    .ok()
                    .and_then(|mut tagged| tagged.get_mut("data").map(Value::take))
                    .unwrap_or_else(|| Value::Object(Map::new()));
                (kind.name().to_owned(), data)
            }
        };

        let mut obj = Map::new();
        obj.insert("name".to_owned(), Value::String(name));
        if let Some(timestamp) = self.recorded_at() {
            obj.insert("timestamp".to_owned(), json!(timestamp));
        }
        if let Some(relative_time) = self.relative_time {
            obj.insert("relative_time".to_owned(), json!(relative_time));
        }
        obj.insert("data".to_owned(), data);
        Value::Object(obj)
    }
}

fn optional_f64(obj: &Map<String, Value>, key: &str) -> Result<Option<f64>, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            format!(
                "field `{key}` must be a number, found {}",
                json_type(value)
            )
        }),
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Serialize for EventRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_start_decodes_into_typed_variant() {
        let value = json!({
            "name": "round_start",
            "timestamp": 12.5,
            "data": {"round": 2, "instruction": "fix the tests"}
        });
        let record = EventRecord::from_value(value);
        assert!(record.is_decoded());
        assert_eq!(record.kind(), ROUND_START);
        assert_eq!(record.round(), Some(2));
        assert_eq!(record.instruction(), Some("fix the tests"));
        assert_eq!(record.timestamp, 12.5);
    }

    #[test]
    fn missing_optional_fields_default() {
        let record = EventRecord::from_value(json!({"name": "task_end"}));
        assert!(record.is_decoded());
        assert_eq!(record.timestamp, 0.0);
        assert_eq!(record.recorded_at(), None);
        assert_eq!(record.relative_time, None);
        assert_eq!(record.payload, EventPayload::Known(EventKind::TaskEnd { path: None }));
        assert!(record.to_value().get("timestamp").is_none());
    }

    #[test]
    fn kind_and_payload_aliases_are_accepted() {
        let record = EventRecord::from_value(json!({
            "kind": "tool_call",
            "timestamp": 1,
            "payload": {"name": "grep", "arguments": {"pattern": "todo"}}
        }));
        assert!(matches!(
            record.payload,
            EventPayload::Known(EventKind::ToolCall { ref name, .. }) if name == "grep"
        ));
    }

    #[test]
    fn unknown_name_becomes_custom() {
        let record = EventRecord::from_value(json!({
            "name": "future_feature",
            "timestamp": 3.0,
            "data": {"key": "value"}
        }));
        assert!(record.is_decoded());
        assert_eq!(record.kind(), "future_feature");
        if let EventPayload::Custom { data, .. } = &record.payload {
            assert_eq!(data["key"], "value");
        } else {
            panic!("should be Custom");
        }
    }

    #[test]
    fn malformed_payload_is_kept_raw_with_its_kind() {
        let raw = json!({
            "name": "round_start",
            "timestamp": 4.0,
            "data": {"round": "not-a-number"}
        });
        let record = EventRecord::from_value(raw.clone());
        assert!(!record.is_decoded());
        assert_eq!(record.kind(), ROUND_START);
        assert_eq!(record.recorded_at(), Some(4.0));
        assert!(record.decode_error().unwrap().contains("round_start"));
        assert_eq!(record.to_value(), raw);
    }

    #[test]
    fn garbage_is_kept_raw() {
        let record = EventRecord::from_value(json!("garbage"));
        assert_eq!(record.kind(), "raw");
        assert_eq!(record.timestamp, 0.0);
        assert_eq!(record.recorded_at(), None);
        assert_eq!(record.to_value(), json!("garbage"));

        let bad_ts = EventRecord::from_value(json!({"name": "exec", "timestamp": "soon"}));
        assert!(!bad_ts.is_decoded());
        assert_eq!(bad_ts.kind(), "exec");
    }

    #[test]
    fn reserialization_is_canonical() {
        let original = EventRecord::at(
            EventKind::RoundEnd {
                round: 1,
                response: Some("done".into()),
            },
            10.0,
        )
        .with_relative_time(2.5);
        let first = serde_json::to_value(&original).unwrap();
        let back: EventRecord = serde_json::from_value(first.clone()).unwrap();
        assert_eq!(back, original);
        assert_eq!(serde_json::to_value(&back).unwrap(), first);
        assert_eq!(first["name"], "round_end");
        assert_eq!(first["data"]["response"], "done");
    }

    #[test]
    fn new_records_are_stamped_with_wall_clock() {
        let record = EventRecord::new(EventKind::TaskEnd { path: None });
        assert!(record.timestamp > 1_600_000_000.0);
    }
}
