//! Core error taxonomy (spec §7).
//!
//! Everything below the MCP dispatch boundary is free to propagate
//! `anyhow::Error`; `GitOperationManager` (and read-path tools, directly) are
//! the only places that classify an error into a [`CoreError`] before it
//! reaches the tool-call response. User-visible failures are strictly JSON —
//! never an uncaught exception on the stdio channel.

use serde_json::{json, Value};

/// One entry per error kind named in spec §7. Never retried unless the
/// variant doc says otherwise.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input: bad scriptId, illegal path, empty searchText. Never
    /// retried; surfaced verbatim.
    #[error("{0}")]
    Validation(String),

    /// Credentials missing or expired. Client should re-authenticate.
    #[error("{0}")]
    Auth(String),

    /// Remote file or project absent. Never retried.
    #[error("{0}")]
    NotFound(String),

    /// Auth is fine, target disallows the action.
    #[error("{0}")]
    Permission(String),

    /// Rate/quota exceeded and the external GasApi layer's retries are
    /// exhausted.
    #[error("{0}")]
    Quota(String),

    /// Remote state changed under us (e.g. fileType mismatch after a race).
    /// The caller is expected to re-read.
    #[error("{0}")]
    Conflict(String),

    /// A user git hook rejected the staged content. `stderr` is returned
    /// verbatim. Not retried.
    #[error("hook rejected: {stderr}")]
    HookRejected { stderr: String },

    /// Another holder did not release the per-project lock in time.
    #[error("lock held by {holder_tool} (pid {holder_pid}, op {holder_operation}) for {held_for_secs}s")]
    LockTimeout {
        holder_pid: i64,
        holder_tool: String,
        holder_operation: String,
        held_for_secs: u64,
    },

    /// Best-effort compensating writes failed; remote and local may be
    /// divergent. Names every file the caller should not trust. `cause`,
    /// when present, names the original failure the compensation was
    /// attempted for (e.g. the remote write error that triggered it), so
    /// the response names both failures rather than just the second one.
    #[error(
        "rollback incomplete — divergent files: {}{}",
        divergent_files.join(", "),
        cause.as_ref().map(|c| format!(" (triggered by: {c})")).unwrap_or_default()
    )]
    RollbackIncomplete {
        divergent_files: Vec<String>,
        cause: Option<String>,
    },

    /// Programmer error / invariant violation. Bug-report worthy.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "ValidationError",
            CoreError::Auth(_) => "AuthError",
            CoreError::NotFound(_) => "NotFoundError",
            CoreError::Permission(_) => "PermissionError",
            CoreError::Quota(_) => "QuotaError",
            CoreError::Conflict(_) => "ConflictError",
            CoreError::HookRejected { .. } => "HookRejected",
            CoreError::LockTimeout { .. } => "LockTimeout",
            CoreError::RollbackIncomplete { .. } => "RollbackIncomplete",
            CoreError::Internal(_) => "InternalError",
        }
    }

    /// Structured `data` field for the JSON error envelope, when the
    /// variant carries context beyond its message.
    pub fn data(&self) -> Option<Value> {
        match self {
            CoreError::LockTimeout {
                holder_pid,
                holder_tool,
                holder_operation,
                held_for_secs,
            } => Some(json!({
                "holderPid": holder_pid,
                "holderTool": holder_tool,
                "holderOperation": holder_operation,
                "heldForSecs": held_for_secs,
            })),
            CoreError::RollbackIncomplete { divergent_files, cause } => Some(json!({
                "divergentFiles": divergent_files,
                "cause": cause,
                "recommend": "rsync with dryrun: true",
            })),
            CoreError::HookRejected { stderr } => Some(json!({ "stderr": stderr })),
            _ => None,
        }
    }

    /// The `{kind, message, data}` envelope promised in spec §7.
    pub fn into_json(&self) -> Value {
        let mut envelope = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Some(data) = self.data() {
            envelope["data"] = data;
        }
        envelope
    }
}

/// Best-effort classification of an `anyhow::Error` produced by internal
/// plumbing into a [`CoreError`], mirroring the teacher's
/// `McpDispatcher::classify_error`. Plumbing that wants precise
/// classification should return a `CoreError` directly (via
/// `anyhow::Error::downcast_ref`); this is the fallback for errors that
/// bubbled up from a library (git2, reqwest, io) without one attached.
pub fn classify(err: &anyhow::Error) -> Value {
    if let Some(core) = err.downcast_ref::<CoreError>() {
        return core.into_json();
    }
    json!({
        "kind": "InternalError",
        "message": err.to_string(),
    })
}
