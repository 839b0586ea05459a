use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use novus_model::{ModelTool, ToolCallRequest};

use super::object::BoxToolFuture;
use super::{
    DeferredExecutor, DispatchContext, Error, ExecutionLocus, Executor,
    FrontendTool, LocalExecutor, Tool, ToolSpec,
};

/// Errors raised while building or querying a [`Registry`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with this name is already registered.
    DuplicateTool(String),
    /// No tool with this name is registered.
    UnknownTool(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateTool(name) => {
                write!(f, "tool `{name}` is already registered")
            }
            RegistryError::UnknownTool(name) => {
                write!(f, "tool `{name}` is not registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// The set of tools the model may call, in registration order.
///
/// Order matters: it is the order tools are presented to the model, and
/// the instructions refer to some tools by their implied priority.
#[derive(Default)]
pub struct Registry {
    executors: Vec<Arc<dyn Executor>>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Registers an executor under its spec's name.
    pub fn register<E: Executor>(
        &mut self,
        executor: E,
    ) -> Result<(), RegistryError> {
        let name = executor.spec().name.clone();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        debug!(
            "registered {:?} tool {name}",
            executor.spec().locus
        );
        self.index.insert(name, self.executors.len());
        self.executors.push(Arc::new(executor));
        Ok(())
    }

    /// Registers a tool executed by the backend.
    #[inline]
    pub fn register_local<T: Tool>(&mut self, tool: T) -> Result<(), RegistryError> {
        self.register(LocalExecutor::new(tool))
    }

    /// Registers a tool executed by the client.
    #[inline]
    pub fn register_frontend<T: FrontendTool>(
        &mut self,
        tool: T,
    ) -> Result<(), RegistryError> {
        self.register(DeferredExecutor::new(tool))
    }

    /// Returns the spec of the named tool.
    pub fn lookup(&self, name: &str) -> Result<&ToolSpec, RegistryError> {
        self.index
            .get(name)
            .map(|idx| self.executors[*idx].spec())
            .ok_or_else(|| RegistryError::UnknownTool(name.to_owned()))
    }

    /// Returns every spec in registration order.
    pub fn describe_all(&self) -> Vec<ToolSpec> {
        self.executors.iter().map(|e| e.spec().clone()).collect()
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub(crate) fn definitions(&self) -> Vec<ModelTool> {
        self.executors
            .iter()
            .map(|e| {
                let spec = e.spec();
                ModelTool {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.parameters.clone(),
                }
            })
            .collect()
    }

    /// Starts every request, in request order.
    ///
    /// The spawner receives the call id, the tool's locus (`None` for an
    /// unknown tool) and the future producing the result. Unknown tools get
    /// a future that fails immediately so the model can correct itself.
    pub(crate) fn handle_requests<S>(
        &self,
        requests: Vec<ToolCallRequest>,
        ctx: &DispatchContext,
        spawner: S,
    ) where
        S: FnMut(String, Option<ExecutionLocus>, BoxToolFuture),
    {
        let mut spawner = spawner;

        let span = debug_span!("tool registry");
        let _enter = span.enter();

        for req in requests {
            let ToolCallRequest {
                id,
                name,
                arguments,
            } = req;
            let Some(executor) = self.index.get(&name).map(|i| &self.executors[*i])
            else {
                warn!("tool not found: {name}");
                let err = Error::unknown_tool(&name);
                spawner(id, None, Box::pin(std::future::ready(Err(err))));
                continue;
            };

            trace!("spawning {name} ({id}) with args: {arguments:?}");
            let locus = executor.spec().locus;
            let fut = Arc::clone(executor).execute(id.clone(), arguments, ctx);
            spawner(id, Some(locus), fut);
        }
    }
}
