//! Error types for the EmberKv server core.
//!
//! Script-visible errors render as short human-readable strings with a
//! leading tag word (`NOTBUSY`, `UNKILLABLE`, `MISCONF`, ...), matching what
//! an external client would see on the wire. Gateway errors are local to the
//! running script: the engine decides whether to re-raise them or recover.

use std::fmt;
use std::io;

use crate::acl::AclDeniedKind;

/// The result type used throughout EmberKv.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for EmberKv operations.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred.
    Io(io::Error),

    /// An invalid argument was provided.
    InvalidArgument(String),

    /// The server is in an invalid state for the requested operation.
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    Serialization(String),

    /// Data corruption was detected.
    Corruption(String),

    /// A checksum mismatch was detected.
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// An internal error occurred.
    Internal(String),

    /// A script called a command that does not exist in the command table.
    UnknownCommand,

    /// A script called a command with the wrong number of arguments.
    WrongArity,

    /// A script called a command carrying the no-script flag.
    CommandNotAllowedFromScript,

    /// The authorization engine refused the command.
    PermissionDenied(AclDeniedKind),

    /// A write command was issued from a script that declared itself read-only.
    ReadOnlyScript,

    /// A write command was refused because this server is a read-only replica.
    ReplicaReadOnly,

    /// Writes are blocked because the last snapshot attempt failed.
    SnapshotWriteError,

    /// Writes are blocked because the append-only file cannot be written.
    AppendLogWriteError(String),

    /// A memory-enlarging command was refused under memory pressure.
    OutOfMemory,

    /// A script attempted a write while the cluster is down and read-only.
    ClusterWriteDown,

    /// A script attempted a command while the cluster is down.
    ClusterDown,

    /// A script addressed a key whose hash slot is not served by this node.
    ClusterNonLocalKey,

    /// A kill was requested but no script is running.
    NoScriptRunning,

    /// The running script was sent by the upstream master and cannot be killed.
    UnkillableMasterScript,

    /// The running script already wrote to the dataset and cannot be killed.
    UnkillableDirtyScript,

    /// The kill command does not match the kind of script that is running.
    ///
    /// `running_eval` is true when the busy script is an ad-hoc eval script
    /// (so the admin should have used `SCRIPT KILL`), false when it is a
    /// stored function (so the admin should have used `FUNCTION KILL`).
    KillWrongType {
        /// Whether the currently running script is in eval mode.
        running_eval: bool,
    },

    /// The script was terminated by an administrative kill.
    ScriptKilled,

    /// The script engine reported a failure while running the script body.
    ScriptFailed(String),
}

impl Error {
    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Corruption(msg) => write!(f, "Data corruption: {}", msg),
            Error::ChecksumMismatch { expected, actual } => {
                write!(f, "Checksum mismatch: expected {:#x}, got {:#x}", expected, actual)
            }
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
            Error::UnknownCommand => write!(f, "Unknown command called from script"),
            Error::WrongArity => {
                write!(f, "Wrong number of args calling command from script")
            }
            Error::CommandNotAllowedFromScript => {
                write!(f, "This command is not allowed from script")
            }
            Error::PermissionDenied(kind) => match kind {
                AclDeniedKind::Command => write!(
                    f,
                    "The user executing the script can't run this command or subcommand"
                ),
                AclDeniedKind::Key => write!(
                    f,
                    "The user executing the script can't access at least one of the \
                     keys mentioned in the command arguments"
                ),
                AclDeniedKind::Channel => write!(
                    f,
                    "The user executing the script can't publish to the channel \
                     mentioned in the command"
                ),
                AclDeniedKind::Other => write!(
                    f,
                    "The user executing the script is lacking the permissions for \
                     the command"
                ),
            },
            Error::ReadOnlyScript => {
                write!(f, "Write commands are not allowed from read-only scripts.")
            }
            Error::ReplicaReadOnly => {
                write!(f, "READONLY You can't write against a read only replica.")
            }
            Error::SnapshotWriteError => write!(
                f,
                "MISCONF Server is configured to save snapshots, but it's currently \
                 unable to persist to disk. Commands that may modify the data set \
                 are disabled."
            ),
            Error::AppendLogWriteError(cause) => {
                write!(f, "MISCONF Errors writing to the append only file: {}", cause)
            }
            Error::OutOfMemory => {
                write!(f, "OOM command not allowed when used memory > 'maxmemory'.")
            }
            Error::ClusterWriteDown => write!(
                f,
                "Script attempted to execute a write command while the cluster is \
                 down and readonly"
            ),
            Error::ClusterDown => {
                write!(f, "Script attempted to execute a command while the cluster is down")
            }
            Error::ClusterNonLocalKey => {
                write!(f, "Script attempted to access a non local key in a cluster node")
            }
            Error::NoScriptRunning => {
                write!(f, "NOTBUSY No scripts in execution right now.")
            }
            Error::UnkillableMasterScript => write!(
                f,
                "UNKILLABLE The busy script was sent by a master instance in the \
                 context of replication and cannot be killed."
            ),
            Error::UnkillableDirtyScript => write!(
                f,
                "UNKILLABLE Sorry the script already executed write commands against \
                 the dataset. You can either wait the script termination or kill the \
                 server in a hard way using the SHUTDOWN NOSAVE command."
            ),
            Error::KillWrongType { running_eval: true } => write!(
                f,
                "BUSY Server is busy running a script. You can only call SCRIPT KILL \
                 or SHUTDOWN NOSAVE."
            ),
            Error::KillWrongType { running_eval: false } => write!(
                f,
                "BUSY Server is busy running a function. You can only call FUNCTION \
                 KILL or SHUTDOWN NOSAVE."
            ),
            Error::ScriptKilled => {
                write!(f, "Script killed by user with a kill command.")
            }
            Error::ScriptFailed(msg) => write!(f, "Script failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_tags() {
        assert!(Error::NoScriptRunning.to_string().starts_with("NOTBUSY"));
        assert!(Error::UnkillableDirtyScript.to_string().starts_with("UNKILLABLE"));
        assert!(Error::UnkillableMasterScript.to_string().starts_with("UNKILLABLE"));
        assert!(Error::ReplicaReadOnly.to_string().starts_with("READONLY"));
        assert!(Error::OutOfMemory.to_string().starts_with("OOM"));
        assert!(Error::SnapshotWriteError.to_string().starts_with("MISCONF"));
        assert!(Error::AppendLogWriteError("broken pipe".into())
            .to_string()
            .starts_with("MISCONF"));
        assert!(Error::KillWrongType { running_eval: true }.to_string().starts_with("BUSY"));
    }

    #[test]
    fn test_kill_wrong_type_names_the_right_command() {
        let running_eval = Error::KillWrongType { running_eval: true }.to_string();
        assert!(running_eval.contains("SCRIPT KILL"));

        let running_function = Error::KillWrongType { running_eval: false }.to_string();
        assert!(running_function.contains("FUNCTION KILL"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_acl_denied_messages_differ() {
        let kinds = [
            AclDeniedKind::Command,
            AclDeniedKind::Key,
            AclDeniedKind::Channel,
            AclDeniedKind::Other,
        ];
        let messages: Vec<String> =
            kinds.iter().map(|k| Error::PermissionDenied(*k).to_string()).collect();
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
