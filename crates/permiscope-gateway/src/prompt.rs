// prompt.rs — Interactive approval prompts.
//
// When a run needs a human, the gateway shows the action on an
// ApprovalPrompt while it also polls the approval store for a decision
// made elsewhere. Prompts are blocking; the gateway calls them from a
// blocking thread and abandons them if another source answers first.

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::Mutex;

use permiscope_policy::Action;

use crate::error::PromptError;

/// A human's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Approve,
    Reject,
}

/// Asks a human whether an action may proceed.
pub trait ApprovalPrompt: Send + Sync {
    /// Blocks until the human answers. An error means this prompt cannot
    /// decide (closed input, garbled answer); the gateway keeps waiting on
    /// other sources.
    fn ask(&self, action: &Action) -> Result<PromptAnswer, PromptError>;
}

/// An ApprovalPrompt over a terminal (or any reader/writer pair).
///
/// Reads are not cancellable. When the store or the timeout decides first,
/// the abandoned `ask` keeps its blocking thread in `read_line`, and the next
/// line typed is consumed and discarded by it. A later prompt on the same
/// instance is still rendered right away but only reads after that line.
pub struct TerminalPrompt {
    reader: Mutex<BufReader<Box<dyn Read + Send>>>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl TerminalPrompt {
    /// Create a prompt from raw reader/writer.
    /// Use `TerminalPrompt::stdio()` for a real terminal, or pass mock I/O for tests.
    pub fn new(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
        }
    }

    /// Read answers from stdin; render to stderr so stdout stays clean.
    pub fn stdio() -> Self {
        Self::new(Box::new(std::io::stdin()), Box::new(std::io::stderr()))
    }

    fn render(action: &Action) -> String {
        let mut out = String::new();
        out.push('\n');
        out.push_str("--- PERMISCOPE SECURITY ALERT ---\n");
        out.push_str(&format!(
            "Agent '{}' wants to perform: {}\n",
            action.agent_id, action.action_name
        ));
        let params = serde_json::to_string_pretty(&action.parameters)
            .unwrap_or_else(|_| "{}".to_string());
        out.push_str(&format!("Parameters: {}\n", params));
        if let Some(reason) = &action.reason {
            out.push_str(&format!("Reason: {}\n", reason));
        }
        out.push_str("Respond here, or decide from another terminal with `permiscope approvals`.\n");
        out.push_str("Allow this action? (y/N): ");
        out
    }

    fn parse_answer(input: &str) -> Result<PromptAnswer, PromptError> {
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" | "a" | "approve" => Ok(PromptAnswer::Approve),
            // Default is No.
            "" | "n" | "no" | "r" | "reject" => Ok(PromptAnswer::Reject),
            other => Err(PromptError::InvalidResponse(format!(
                "unrecognized input: '{}'",
                other
            ))),
        }
    }
}

impl ApprovalPrompt for TerminalPrompt {
    fn ask(&self, action: &Action) -> Result<PromptAnswer, PromptError> {
        // Render before waiting on the reader: a prompt abandoned by an
        // earlier run may still be parked in `read_line`, and the user should
        // see which action the next line answers.
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|e| PromptError::Other(format!("writer lock poisoned: {}", e)))?;
            writer.write_all(Self::render(action).as_bytes())?;
            writer.flush()?;
        }

        let mut reader = self
            .reader
            .lock()
            .map_err(|e| PromptError::Other(format!("reader lock poisoned: {}", e)))?;
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(PromptError::Closed);
        }
        Self::parse_answer(&line)
    }
}

/// Answers every prompt the same way. For batch mode and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPrompt {
    answer: PromptAnswer,
}

impl StaticPrompt {
    pub fn approve_all() -> Self {
        Self {
            answer: PromptAnswer::Approve,
        }
    }

    pub fn reject_all() -> Self {
        Self {
            answer: PromptAnswer::Reject,
        }
    }
}

impl ApprovalPrompt for StaticPrompt {
    fn ask(&self, _action: &Action) -> Result<PromptAnswer, PromptError> {
        Ok(self.answer)
    }
}
