//! Control endpoint commands.

use std::fmt;

/// An imperative request sent to the provider's control endpoint.
///
/// Commands do not carry state; their effect is observed through the
/// next push frame or snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionCommand {
    /// Pause the active session.
    Pause,
    /// Resume a paused session.
    Resume,
    /// Mark the session as completed.
    Complete,
}

impl SessionCommand {
    /// Returns the command name used in the control path.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionCommand::Pause => "pause",
            SessionCommand::Resume => "resume",
            SessionCommand::Complete => "complete",
        }
    }

    /// Returns the control endpoint path for this command.
    pub fn path(&self) -> String {
        format!("/control/{}", self.as_str())
    }
}

impl fmt::Display for SessionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
