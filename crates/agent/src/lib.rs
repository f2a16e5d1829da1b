//! The conversation loop of the Toolbox agent.
//!
//! One human turn runs as **Call → Tool → Call** until the model answers:
//!
//! 1. **Append** the user message to History
//! 2. **Stream** a model call and show the visible answer as it arrives
//! 3. **If a tool is requested**: run it, append the exchange, go back to step 2
//! 4. **Otherwise**: append the final answer and hand the turn back
//!
//! The loop also stops once the per-turn round-trip cap is reached.

pub mod answer_filter;
pub mod orchestrator;
pub mod session;
pub mod sink;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use answer_filter::AnswerFilter;
pub use orchestrator::{EMPTY_REPLY, Orchestrator, ROUND_TRIP_LIMIT_NOTICE, TurnSummary};
pub use session::{Session, SessionHandle, TurnError};
pub use sink::{ChannelSink, NullSink, PresentationSink, RecordingSink, SinkEvent};
pub use turn::{CallMachine, CallOutcome};
