//! The provider-neutral protocol spoken between the assistant and an LLM.
//!
//! Every model backend (the OpenAI-compatible provider, the scripted test
//! provider) implements [`ModelProvider`] and streams [`ModelResponseEvent`]s
//! back. The agent only ever sees these types, so backends can be swapped
//! without touching the orchestration code.
//!
//! Types in this crate don't define any behavior, they are the constraints
//! that implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
