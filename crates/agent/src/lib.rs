//! The turn engine.
//!
//! Every turn runs three phases against one resolved model:
//!
//! 1. **Plan**: a structured-output call breaks the request into steps
//! 2. **Act**: each step runs with the merged tools and ends in an
//!    [`ActionRecord`](planact_core::plan::ActionRecord); steps may add steps
//! 3. **Respond**: a tool-free call writes the answer from the plan and the
//!    action history
//!
//! The [`Orchestrator`] ties the phases together and serves the turn as
//! separate reasoning and text channels.

pub mod act;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod reply;
pub mod respond;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use act::{ActOutcome, ActPhase, ExternalToolCall};
pub use orchestrator::{Orchestrator, TurnRequest, TurnResponse, TurnStream, TurnSummary};
pub use plan::PlanPhase;
pub use reply::{Reply, ReplyStream};
pub use respond::{ResponseOutcome, ResponsePhase, TextChunk};
pub use stream_event::{EventSink, TurnEvent};
