use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// A deferred call surfaced to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredRequest {
    /// Identifier the result must be sent back with.
    pub call_id: String,
    /// Name of the frontend tool to run.
    pub tool_name: String,
    /// Arguments as produced by the model.
    pub arguments: Value,
}

/// The client's answer to a [`DeferredRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendResult {
    /// Identifier of the call being answered.
    pub call_id: String,
    /// Name of the tool that was run.
    pub tool_name: String,
    /// Result text handed to the model as-is.
    pub result: String,
}

/// Reasons a [`FrontendResult`] can be refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// No call with this identifier is waiting. It never existed, was
    /// already answered, timed out, or its session was cancelled.
    UnknownCall(String),
    /// The call exists but belongs to another tool. The call keeps waiting.
    ToolMismatch {
        /// Identifier of the call.
        call_id: String,
        /// The tool the call was made to.
        expected: String,
        /// The tool named by the result.
        actual: String,
    },
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::UnknownCall(call_id) => {
                write!(f, "no pending tool call with id `{call_id}`")
            }
            ResolveError::ToolMismatch {
                call_id,
                expected,
                actual,
            } => write!(
                f,
                "tool call `{call_id}` was made to `{expected}`, not `{actual}`"
            ),
        }
    }
}

impl std::error::Error for ResolveError {}

struct DeferredCall {
    request: DeferredRequest,
    result_tx: oneshot::Sender<String>,
}

/// The deferred calls of one session that are waiting for the client.
///
/// Each call resolves at most once. Dropping an entry without resolving it
/// wakes the waiting tool future with a cancellation.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<String, DeferredCall>>,
}

impl PendingCalls {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeferredCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(
        &self,
        request: DeferredRequest,
    ) -> oneshot::Receiver<String> {
        let (result_tx, result_rx) = oneshot::channel();
        let call_id = request.call_id.clone();
        let replaced = self.lock().insert(
            call_id.clone(),
            DeferredCall { request, result_tx },
        );
        if replaced.is_some() {
            warn!("deferred call id `{call_id}` reused, dropping the older call");
        }
        result_rx
    }

    pub(crate) fn remove(&self, call_id: &str) {
        self.lock().remove(call_id);
    }

    /// Drops every waiting call without answering it.
    pub(crate) fn clear(&self) {
        let dropped = std::mem::take(&mut *self.lock());
        if !dropped.is_empty() {
            debug!("released {} pending deferred call(s)", dropped.len());
        }
    }

    /// Delivers a client result to the call waiting for it.
    pub fn resolve(&self, result: FrontendResult) -> Result<(), ResolveError> {
        let mut calls = self.lock();
        let Some(call) = calls.get(&result.call_id) else {
            return Err(ResolveError::UnknownCall(result.call_id));
        };
        if call.request.tool_name != result.tool_name {
            return Err(ResolveError::ToolMismatch {
                call_id: result.call_id,
                expected: call.request.tool_name.clone(),
                actual: result.tool_name,
            });
        }

        let call = calls
            .remove(&result.call_id)
            .ok_or_else(|| ResolveError::UnknownCall(result.call_id.clone()))?;
        drop(calls);

        trace!("resolving deferred call {}", result.call_id);
        call.result_tx
            .send(result.result)
            .map_err(|_| ResolveError::UnknownCall(result.call_id))
    }

    /// Returns the calls still waiting, in no particular order.
    pub fn requests(&self) -> Vec<DeferredRequest> {
        self.lock()
            .values()
            .map(|call| call.request.clone())
            .collect()
    }

    /// Returns the number of waiting calls.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no call is waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
