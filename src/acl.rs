//! Authorization seam consumed by the command gateway.
//!
//! The policy engine itself lives outside this crate; the gateway only
//! depends on the `AclEngine` trait and on the audit entries the server
//! records when a check fails. Scripts run under the identity of the client
//! that invoked them, so checks are evaluated against the caller's user,
//! copied onto the pseudo-client before each command.

use bytes::Bytes;

use crate::client::Client;
use crate::command::CommandSpec;

/// Which part of a command an authorization denial applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclDeniedKind {
    /// The command (or subcommand) itself is not permitted.
    Command,
    /// At least one key mentioned in the arguments is not accessible.
    Key,
    /// The channel mentioned in the arguments is not accessible.
    Channel,
    /// Any other lack of permission.
    Other,
}

/// Result of a full permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclCheck {
    /// The command may proceed.
    Allowed,
    /// The command is refused.
    Denied {
        /// What was denied.
        kind: AclDeniedKind,
        /// Index into the argument vector of the offending argument, when
        /// the engine can point at one.
        position: Option<usize>,
    },
}

/// Execution context recorded with an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclLogContext {
    /// The command arrived directly from a client.
    TopLevel,
    /// The command was issued by a script.
    Script,
}

/// One entry in the authorization audit log.
#[derive(Debug, Clone)]
pub struct AclAuditEntry {
    /// User the check was evaluated for.
    pub username: String,
    /// What was denied.
    pub kind: AclDeniedKind,
    /// Where the command came from.
    pub context: AclLogContext,
    /// The offending argument, when the engine pointed at one.
    pub object: Option<String>,
}

/// Permission oracle for commands, keys, and channels.
pub trait AclEngine {
    /// Evaluates every permission the current command requires under the
    /// client's authenticated user.
    fn check_all_permissions(
        &self,
        client: &Client,
        cmd: &CommandSpec,
        argv: &[Bytes],
    ) -> AclCheck;
}

/// Engine that permits everything. Installed by default.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AclEngine for AllowAll {
    fn check_all_permissions(
        &self,
        _client: &Client,
        _cmd: &CommandSpec,
        _argv: &[Bytes],
    ) -> AclCheck {
        AclCheck::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all_allows() {
        let engine = AllowAll;
        let client = Client::new(1);
        let cmd = crate::command::lookup(b"GET").unwrap();
        let argv = vec![Bytes::from_static(b"GET"), Bytes::from_static(b"k")];
        assert_eq!(engine.check_all_permissions(&client, cmd, &argv), AclCheck::Allowed);
    }
}
