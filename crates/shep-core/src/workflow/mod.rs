//! The feature-agent graph: a checkpointed state machine over SDLC phases.
//!
//! ```text
//! analyze → requirements → research → plan → implement → merge ─┬→ end
//!              (allow_prd)            (allow_plan)    (allow_merge)
//!                                                                └→ ci_fix ⟲ → end
//! ```
//!
//! A [`WorkflowGraph`] runs nodes strictly in sequence for one thread id.
//! After each node returns, its [`StateUpdate`] is reduced into the state
//! and a [`Checkpoint`](crate::checkpoint::Checkpoint) is written, so a
//! thread can be continued by any later process.

mod ci_fix;
mod graph;
mod merge;
mod node;
pub mod prompts;
mod resume;
mod state;

pub use graph::{GraphOutcome, GraphSettings, WorkflowGraph};
pub use node::{Gate, Node};
pub use resume::{Decision, GraphCommand, ResumePayload};
pub use state::{
    ApprovalAction, ApprovalGates, CiFixOutcome, CiFixRecord, CiFixStatus, PendingCiFix,
    StateUpdate, WorkflowState,
};
