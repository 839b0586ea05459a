use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::timeout;
use tracing::Instrument;

use super::{
    DeferredRequest, Error, ExecutionLocus, FrontendTool, PendingCalls, Tool,
    ToolResult, ToolSpec,
};

pub(crate) type BoxToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
type OnDeferred = Arc<dyn Fn(&DeferredRequest) + Send + Sync>;

/// Per-session state an executor may need to dispatch a call.
#[derive(Clone)]
pub struct DispatchContext {
    pending: Arc<PendingCalls>,
    on_deferred: Option<OnDeferred>,
    deferred_timeout: Option<Duration>,
}

impl DispatchContext {
    /// Creates a context around a session's pending call table.
    #[inline]
    pub fn new(pending: Arc<PendingCalls>) -> Self {
        Self {
            pending,
            on_deferred: None,
            deferred_timeout: None,
        }
    }

    /// Sets the callback notified of every new deferred call.
    #[inline]
    pub fn on_deferred(
        mut self,
        on_deferred: impl Fn(&DeferredRequest) + Send + Sync + 'static,
    ) -> Self {
        self.on_deferred = Some(Arc::new(on_deferred));
        self
    }

    /// Bounds how long a deferred call waits for the client. `None` waits
    /// until the call is resolved or the session is cancelled.
    #[inline]
    pub fn with_deferred_timeout(mut self, limit: Option<Duration>) -> Self {
        self.deferred_timeout = limit;
        self
    }

    /// Returns the pending call table.
    #[inline]
    pub fn pending(&self) -> &Arc<PendingCalls> {
        &self.pending
    }
}

impl Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("pending", &self.pending.len())
            .field("deferred_timeout", &self.deferred_timeout)
            .finish_non_exhaustive()
    }
}

/// A registry entry: a tool's spec plus the means to run it.
pub trait Executor: Send + Sync + 'static {
    /// Returns the spec the tool was registered with.
    fn spec(&self) -> &ToolSpec;

    /// Decodes the arguments and starts the call.
    ///
    /// Decoding happens before this method returns, the returned future
    /// only carries the execution itself.
    fn execute(
        self: Arc<Self>,
        call_id: String,
        arguments: Value,
        ctx: &DispatchContext,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>>;
}

fn decode<I: DeserializeOwned>(tool: &str, arguments: Value) -> Result<I, Error> {
    serde_json::from_value(arguments).map_err(|err| {
        debug!("rejected arguments for {tool}: {err}");
        Error::invalid_argument().with_reason(format!("{err}"))
    })
}

#[inline]
fn rejected(err: Error) -> BoxToolFuture {
    Box::pin(std::future::ready(Err(err)))
}

/// Runs a [`Tool`] in the backend.
pub struct LocalExecutor<T: Tool> {
    tool: T,
    spec: ToolSpec,
}

impl<T: Tool> LocalExecutor<T> {
    /// Wraps a local tool.
    pub fn new(tool: T) -> Self {
        let spec = ToolSpec {
            name: tool.name().to_owned(),
            description: tool.description().trim().to_owned(),
            parameters: tool.parameter_schema().clone(),
            locus: ExecutionLocus::Local,
        };
        Self { tool, spec }
    }
}

impl<T: Tool> Executor for LocalExecutor<T> {
    #[inline]
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn execute(
        self: Arc<Self>,
        call_id: String,
        arguments: Value,
        _ctx: &DispatchContext,
    ) -> BoxToolFuture {
        let input: T::Input = match decode(&self.spec.name, arguments) {
            Ok(input) => input,
            Err(err) => return rejected(err),
        };
        Box::pin(self.tool.execute(input).instrument(debug_span!(
            "tool execute",
            tool = %self.spec.name,
            call_id = %call_id,
        )))
    }
}

/// Hands a [`FrontendTool`] call to the client and waits for its result.
pub struct DeferredExecutor<T: FrontendTool> {
    tool: T,
    spec: ToolSpec,
}

impl<T: FrontendTool> DeferredExecutor<T> {
    /// Wraps a frontend tool.
    pub fn new(tool: T) -> Self {
        let spec = ToolSpec {
            name: tool.name().to_owned(),
            description: tool.description().trim().to_owned(),
            parameters: tool.parameter_schema().clone(),
            locus: ExecutionLocus::Deferred,
        };
        Self { tool, spec }
    }
}

impl<T: FrontendTool> Executor for DeferredExecutor<T> {
    #[inline]
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn execute(
        self: Arc<Self>,
        call_id: String,
        arguments: Value,
        ctx: &DispatchContext,
    ) -> BoxToolFuture {
        let input: T::Input = match decode(&self.spec.name, arguments.clone()) {
            Ok(input) => input,
            Err(err) => return rejected(err),
        };
        if let Err(err) = self.tool.check(&input) {
            debug!("{} rejected by check: {err}", self.spec.name);
            return rejected(err);
        }

        // Register before notifying, a fast client may answer right away.
        let request = DeferredRequest {
            call_id: call_id.clone(),
            tool_name: self.spec.name.clone(),
            arguments,
        };
        let result_rx = ctx.pending.insert(request.clone());
        if let Some(on_deferred) = &ctx.on_deferred {
            on_deferred(&request);
        }

        let pending = Arc::clone(&ctx.pending);
        let limit = ctx.deferred_timeout;
        Box::pin(
            async move {
                let result = match limit {
                    Some(limit) => match timeout(limit, result_rx).await {
                        Ok(result) => result,
                        Err(_) => {
                            pending.remove(&call_id);
                            warn!("no frontend result within {limit:?}");
                            return Err(Error::frontend_timeout().with_reason(
                                format!("the user interface did not respond within {limit:?}"),
                            ));
                        }
                    },
                    None => result_rx.await,
                };
                result.map_err(|_| Error::cancelled())
            }
            .instrument(debug_span!(
                "deferred call",
                tool = %request.tool_name,
                call_id = %request.call_id,
            )),
        )
    }
}
