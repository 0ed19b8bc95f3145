//! Error types for script execution
//!
//! Script-side failures are plain [`ScriptError`] values that travel through
//! the VM's normal error path. Aborts raised by hooks are ordinary script
//! errors too; they are told apart only by their message.

/// Message raised when a script exceeds its execution budget
pub const TIMEOUT_MESSAGE: &str = "Invoking timeout.";

/// Message raised when the host requested the script to stop
pub const ABORT_MESSAGE: &str = "User abort.";

/// Error raised by script code or by a debug hook
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// Source failed to compile
    #[error("{source_name}: {message}")]
    Compile {
        source_name: String,
        message: String,
    },

    /// Runtime fault inside user code
    #[error("{0}")]
    Runtime(String),

    /// Cooperative cancellation raised from a hook (timeout or user stop)
    #[error("{0}")]
    Abort(String),
}

impl ScriptError {
    /// Abort raised when the activity budget ran out
    pub fn timeout() -> Self {
        Self::Abort(TIMEOUT_MESSAGE.to_string())
    }

    /// Abort raised when a stop was requested
    pub fn user_abort() -> Self {
        Self::Abort(ABORT_MESSAGE.to_string())
    }

    /// Whether this error is one of the hook-raised aborts.
    ///
    /// VMs may rewrap hook errors as runtime errors, so the check looks at
    /// the message rather than the variant.
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Abort(_) => true,
            Self::Runtime(msg) => msg.ends_with(TIMEOUT_MESSAGE) || msg.ends_with(ABORT_MESSAGE),
            Self::Compile { .. } => false,
        }
    }
}

/// Error raised by the engine itself (not by user code)
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The script thread could not be started
    #[error("failed to spawn script thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// Configuration file could not be parsed
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("failed to serialize configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Filesystem failure while reading or writing configuration
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_messages_display_verbatim() {
        assert_eq!(ScriptError::timeout().to_string(), "Invoking timeout.");
        assert_eq!(ScriptError::user_abort().to_string(), "User abort.");
    }

    #[test]
    fn test_is_abort_by_message() {
        assert!(ScriptError::user_abort().is_abort());
        assert!(ScriptError::Runtime("main:3: User abort.".into()).is_abort());
        assert!(!ScriptError::Runtime("attempt to call a nil value".into()).is_abort());
        let compile = ScriptError::Compile {
            source_name: "main".into(),
            message: "unexpected symbol".into(),
        };
        assert!(!compile.is_abort());
        assert_eq!(compile.to_string(), "main: unexpected symbol");
    }
}
