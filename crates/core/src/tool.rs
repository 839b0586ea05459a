//! Tool call supports.
//!
//! A tool is either executed by the backend right away ([`Tool`], run by a
//! [`LocalExecutor`]) or handed to the client that renders it
//! ([`FrontendTool`], run by a [`DeferredExecutor`]). Both end up in a
//! [`Registry`] keyed by tool name.

mod deferred;
mod error;
mod object;
mod registry;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use deferred::{DeferredRequest, FrontendResult, PendingCalls, ResolveError};
pub use error::{Error, ErrorKind};
pub use object::{DeferredExecutor, DispatchContext, Executor, LocalExecutor};
pub use registry::{Registry, RegistryError};

/// The result of a tool call.
pub type ToolResult = Result<String, Error>;

/// Where a tool's side effect happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionLocus {
    /// Executed by backend code as soon as it is requested.
    Local,
    /// Surfaced to the client, which performs a UI action and returns a
    /// result string.
    Deferred,
}

/// The registered description of a tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    /// Unique name the model calls the tool by.
    pub name: String,
    /// Free-text description guiding when the model should use the tool.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
    /// Where the call is executed.
    pub locus: ExecutionLocus,
}

/// A tool executed by the backend.
///
/// Implementations of this trait should be stateless. Context such as API
/// clients or credentials can be held as immutable state set during
/// initialization and cloned into the returned future.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

/// A tool executed by the client.
///
/// The backend only decodes and checks the arguments. The call is then
/// surfaced as a [`DeferredRequest`] and the turn waits for the matching
/// [`FrontendResult`].
pub trait FrontendTool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Checks decoded arguments before the call is dispatched.
    ///
    /// Returning an error rejects the call, and the error is reported to
    /// the model instead of reaching the client.
    fn check(&self, _input: &Self::Input) -> Result<(), Error> {
        Ok(())
    }
}
