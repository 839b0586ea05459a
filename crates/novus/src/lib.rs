//! An investment and research assistant served over HTTP.
//!
//! The assistant wires a language model to backend data tools (market data,
//! web search, arXiv, mail) and to frontend tools the client renders, such as
//! meeting cards, a support form and the task checklist. Each client session
//! runs its own agent, see [`session`], and the [`api`] module exposes the
//! sessions with an event stream.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod api;
pub mod config;
pub mod session;
pub mod tools;

/// The instructions every session starts with.
pub const SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");

/// Re-exports of [`novus_core`] crate.
pub mod core {
    pub use novus_core::*;
}
