//! LLM provider implementations for Cortex.
//!
//! The planner talks to any OpenAI-compatible chat-completion endpoint
//! through `cortex_core::Provider`. [`build_from_config`] picks the endpoint
//! from the `[planner]` config section.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, default_base_url};
