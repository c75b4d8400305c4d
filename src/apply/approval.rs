//! Confirmation of destructive actions.

use std::io::{BufRead, Write};
use std::sync::Mutex;

use crate::error::{DeckhandError, Result};
use crate::planner::PlanEntry;

/// Decides whether destructive actions may proceed.
pub trait Approver: Send + Sync {
    /// Returns `true` to proceed with `destructive`.
    ///
    /// # Errors
    ///
    /// Fails when the decision cannot be obtained.
    fn approve(&self, destructive: &[&PlanEntry]) -> Result<bool>;
}

/// Approves everything; for non-interactive callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Approver for AutoApprove {
    fn approve(&self, _destructive: &[&PlanEntry]) -> Result<bool> {
        Ok(true)
    }
}

/// Lists destructive actions and asks `[y/N]`.
pub struct PromptApprover<R, W> {
    io: Mutex<(R, W)>,
}

/// Prompt on the terminal.
pub type StdinApprover = PromptApprover<std::io::BufReader<std::io::Stdin>, std::io::Stderr>;

impl StdinApprover {
    /// Prompts on stderr and reads the answer from stdin.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> PromptApprover<R, W> {
    /// Creates an approver over arbitrary streams.
    pub const fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

impl<R: BufRead + Send, W: Write + Send> Approver for PromptApprover<R, W> {
    fn approve(&self, destructive: &[&PlanEntry]) -> Result<bool> {
        let mut io = self
            .io
            .lock()
            .map_err(|_| DeckhandError::internal("approval prompt poisoned"))?;
        let (reader, writer) = &mut *io;

        writeln!(writer, "The following actions will destroy existing resources:")?;
        for entry in destructive {
            writeln!(writer, "  {} {}", entry.action, entry.identity())?;
        }
        write!(writer, "Do you want to continue? [y/N]: ")?;
        writer.flush()?;

        let mut input = String::new();
        reader.read_line(&mut input)?;
        Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ActionType;
    use std::io::Cursor;

    fn ask(answer: &str) -> (bool, String) {
        let approver = PromptApprover::new(Cursor::new(answer.as_bytes().to_vec()), Vec::new());
        let entry = PlanEntry::new("schemas", "raw", ActionType::Recreate);
        let approved = approver.approve(&[&entry]).expect("approve");
        let (_, written) = approver.io.into_inner().expect("lock");
        (approved, String::from_utf8(written).expect("utf8"))
    }

    #[test]
    fn test_yes_approves() {
        let (approved, prompt) = ask("y\n");
        assert!(approved);
        assert!(prompt.contains("recreate schemas.raw"));
        assert!(prompt.contains("[y/N]"));
    }

    #[test]
    fn test_anything_else_declines() {
        assert!(!ask("\n").0);
        assert!(!ask("no\n").0);
        assert!(!ask("").0);
    }

    #[test]
    fn test_auto_approve() {
        assert!(AutoApprove.approve(&[]).expect("approve"));
    }
}
