use std::io::{self, Write};

use parking_lot::Mutex;
use serde_json::Value;
use tasktrace_events::EventListener;
use tasktrace_protocol::{EventKind, EventPayload, EventRecord, ListenerError};

const PREVIEW_CHARS: usize = 160;

/// Renders replayed events as plain text lines.
pub struct ConsoleDisplay<W> {
    out: Mutex<W>,
}

impl ConsoleDisplay<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleDisplay<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> EventListener for ConsoleDisplay<W> {
    fn name(&self) -> &str {
        "console"
    }

    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError> {
        let Some(line) = render(event) else {
            return Ok(());
        };
        let mut out = self.out.lock();
        writeln!(out, "{line}")
            .and_then(|()| out.flush())
            .map_err(|error| ListenerError::new(self.name(), error.to_string()))
    }
}

fn render(event: &EventRecord) -> Option<String> {
    let kind = match &event.payload {
        EventPayload::Known(kind) => kind,
        EventPayload::Raw { .. } if EventKind::is_known(event.kind()) => {
            return Some(format!("?  unreadable {} record", event.kind()));
        }
        _ => return None,
    };

    let line = match kind {
        EventKind::TaskStart { instruction, title } => match title {
            Some(title) => format!(">> {title}: {instruction}"),
            None => format!(">> {instruction}"),
        },
        EventKind::RoundStart { round, instruction } if instruction.is_empty() => {
            format!("== round {round}")
        }
        EventKind::RoundStart { round, instruction } => {
            format!("== round {round}: {}", preview(instruction))
        }
        EventKind::RoundEnd { round, response } => match response {
            Some(response) => format!("== round {round} done: {}", preview(response)),
            None => format!("== round {round} done"),
        },
        EventKind::ResponseComplete { llm, content } if llm.is_empty() => content.clone(),
        EventKind::ResponseComplete { llm, content } => format!("[{llm}] {content}"),
        EventKind::ToolCall { name, arguments } => {
            format!("-> {name} {}", preview(&compact(arguments)))
        }
        EventKind::ToolResult { name, result } => {
            format!("<- {name}: {}", preview(&compact(result)))
        }
        EventKind::Exec { block } => format!("$  exec {}", preview(&compact(block))),
        EventKind::ExecResult { result, .. } => {
            format!("$  result {}", preview(&compact(result)))
        }
        EventKind::Exception { msg, exception } => match exception {
            Some(exception) => format!("!  {msg}: {exception}"),
            None => format!("!  {msg}"),
        },
        EventKind::TaskEnd { path } => match path {
            Some(path) => format!("<< task finished, saved to {path}"),
            None => "<< task finished".to_owned(),
        },
    };
    Some(line)
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn preview(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    match single_line.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &single_line[..cut]),
        None => single_line,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tasktrace_events::EventListener;
    use tasktrace_protocol::{EventKind, EventRecord};

    use super::ConsoleDisplay;

    fn rendered(events: &[EventRecord]) -> String {
        let display = ConsoleDisplay::new(Vec::new());
        for event in events {
            display.on_event(event).expect("vec writer never fails");
        }
        String::from_utf8(display.into_inner()).expect("utf8 output")
    }

    #[test]
    fn renders_known_kinds_line_by_line() {
        let out = rendered(&[
            EventRecord::at(
                EventKind::RoundStart {
                    round: 2,
                    instruction: "check disk usage".into(),
                },
                0.0,
            ),
            EventRecord::at(
                EventKind::ToolCall {
                    name: "df".into(),
                    arguments: json!({"human": true}),
                },
                1.0,
            ),
            EventRecord::at(
                EventKind::Exception {
                    msg: "timeout".into(),
                    exception: None,
                },
                2.0,
            ),
        ]);
        assert_eq!(
            out,
            "== round 2: check disk usage\n-> df {\"human\":true}\n!  timeout\n"
        );
    }

    #[test]
    fn ignores_unknown_kinds_and_flags_unreadable_known_ones() {
        let out = rendered(&[
            EventRecord::custom("heartbeat", Default::default(), 0.0),
            EventRecord::from_value(json!({"name": "round_start", "timestamp": 1.0, "data": 7})),
            EventRecord::from_value(json!(["garbage"])),
        ]);
        assert_eq!(out, "?  unreadable round_start record\n");
    }

    #[test]
    fn long_values_are_clipped() {
        let out = rendered(&[EventRecord::at(
            EventKind::ToolResult {
                name: "cat".into(),
                result: json!("x".repeat(500)),
            },
            0.0,
        )]);
        assert!(out.starts_with("<- cat: xxx"));
        assert!(out.trim_end().ends_with("..."));
        assert!(out.len() < 200);
    }
}
