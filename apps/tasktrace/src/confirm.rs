use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tasktrace_protocol::EventRecord;
use tasktrace_runtime::Confirmer;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Asks before each checkpoint and reads the answer from a line source.
///
/// End of input approves, so a closed or exhausted source never stalls
/// the replay.
pub struct LineConfirmer {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
    prompt: bool,
}

impl LineConfirmer {
    pub fn new(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            lines: Mutex::new(lines),
            prompt: false,
        }
    }

    /// Reads stdin on a detached thread so a pending prompt does not hold
    /// up shutdown after Ctrl-C.
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            lines: Mutex::new(rx),
            prompt: true,
        }
    }
}

#[async_trait]
impl Confirmer for LineConfirmer {
    async fn confirm(&self, checkpoint: &EventRecord) -> bool {
        if self.prompt {
            let mut out = io::stdout().lock();
            if let Err(error) = write!(out, "{} ", prompt(checkpoint)).and_then(|()| out.flush()) {
                debug!(%error, "failed to write confirmation prompt");
            }
        }

        match self.lines.lock().await.recv().await {
            Some(answer) => accepts(&answer),
            None => {
                debug!("input closed, approving checkpoint");
                true
            }
        }
    }
}

const PROMPT_INSTRUCTION_CHARS: usize = 60;

fn prompt(checkpoint: &EventRecord) -> String {
    let round = checkpoint
        .round()
        .map_or_else(|| "?".to_owned(), |round| round.to_string());
    let instruction = checkpoint
        .instruction()
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty());
    match instruction {
        Some(text) => {
            let clipped = match text.char_indices().nth(PROMPT_INSTRUCTION_CHARS) {
                Some((cut, _)) => format!("{}...", &text[..cut]),
                None => text,
            };
            format!("Continue with round {round}: {clipped}? [Y/n]")
        }
        None => format!("Continue with round {round}? [Y/n]"),
    }
}

fn accepts(answer: &str) -> bool {
    !matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "n" | "no" | "q" | "quit"
    )
}

#[cfg(test)]
mod tests {
    use tasktrace_protocol::{EventKind, EventRecord};
    use tasktrace_runtime::Confirmer;
    use tokio::sync::mpsc;

    use super::{LineConfirmer, accepts, prompt};

    fn checkpoint() -> EventRecord {
        EventRecord::at(
            EventKind::RoundStart {
                round: 1,
                instruction: String::new(),
            },
            0.0,
        )
    }

    #[test]
    fn answers() {
        assert!(accepts(""));
        assert!(accepts("y"));
        assert!(accepts(" Yes \n"));
        assert!(!accepts("n"));
        assert!(!accepts("NO"));
        assert!(!accepts(" q "));
    }

    #[test]
    fn prompt_shows_round_and_instruction() {
        let event = EventRecord::at(
            EventKind::RoundStart {
                round: 2,
                instruction: "rerun the\nfailing tests".into(),
            },
            0.0,
        );
        assert_eq!(
            prompt(&event),
            "Continue with round 2: rerun the failing tests? [Y/n]"
        );
        assert_eq!(prompt(&checkpoint()), "Continue with round 1? [Y/n]");

        let long = EventRecord::at(
            EventKind::RoundStart {
                round: 3,
                instruction: "x".repeat(100),
            },
            0.0,
        );
        assert_eq!(
            prompt(&long),
            format!("Continue with round 3: {}...? [Y/n]", "x".repeat(60))
        );
    }

    #[tokio::test]
    async fn reads_one_answer_per_checkpoint() {
        let (tx, rx) = mpsc::unbounded_channel();
        let confirmer = LineConfirmer::new(rx);
        tx.send("y".to_owned()).expect("receiver alive");
        tx.send("n".to_owned()).expect("receiver alive");

        assert!(confirmer.confirm(&checkpoint()).await);
        assert!(!confirmer.confirm(&checkpoint()).await);
    }

    #[tokio::test]
    async fn closed_input_approves() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(tx);
        let confirmer = LineConfirmer::new(rx);
        assert!(confirmer.confirm(&checkpoint()).await);
        assert!(confirmer.confirm(&checkpoint()).await);
    }
}
