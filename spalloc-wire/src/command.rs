//! The inbound `Command` message (spec §3, §4.2).

use serde::Deserialize;
use serde_json::Value;

/// Maximum number of elements allowed in `args` or `kwargs`, independently.
/// A global guard per spec §9's resolution of the source's inconsistent
/// enforcement.
pub const MAX_ARG_COUNT: usize = 10;

/// One inbound line decoded into `{command, args, kwargs}`.
///
/// Discarded after dispatch; never held across an `.await` boundary longer
/// than the single command's handling.
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: std::collections::HashMap<String, Value>,
}

impl Command {
    /// Enforce the non-empty-command and bounded-size invariants from
    /// spec §3. Called once right after JSON decoding.
    pub fn validate(&self) -> Result<(), spalloc_error::Error> {
        spalloc_error::error_if!(self.command.is_empty(), "command name must not be empty");
        spalloc_error::error_if!(
            self.args.len() > MAX_ARG_COUNT,
            "too many positional arguments: {} (max {MAX_ARG_COUNT})",
            self.args.len()
        );
        spalloc_error::error_if!(
            self.kwargs.len() > MAX_ARG_COUNT,
            "too many keyword arguments: {} (max {MAX_ARG_COUNT})",
            self.kwargs.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_command_with_too_many_args() {
        let cmd = Command {
            command: "x".to_string(),
            args: (0..11).map(Value::from).collect(),
            kwargs: Default::default(),
        };
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn accepts_ten_args_exactly() {
        let cmd = Command {
            command: "x".to_string(),
            args: (0..10).map(Value::from).collect(),
            kwargs: Default::default(),
        };
        assert!(cmd.validate().is_ok());
    }
}
