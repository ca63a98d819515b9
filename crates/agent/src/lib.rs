//! The reasoning loop for Cortex.
//!
//! A request runs **decide → act → observe** until the planner answers:
//!
//! 1. **Decide**: show the planner the request, the history and the merged
//!    tool catalogue
//! 2. **Act**: forward the chosen call through the dispatcher
//! 3. **Observe**: fold the result (success or failure) into the history
//!
//! The loop stops on a final answer, when the iteration budget runs out,
//! when the planner fails, or when the request is cancelled.

pub mod loop_runner;
pub mod planner;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use loop_runner::{LoopError, LoopSettings, ReasoningLoop, RunOutcome, RunReport};
pub use planner::{PromptPlanner, parse_decision, strip_final_marker};
pub use session::Session;
