//! Stack and type inference over the control-flow graph.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │ Instructions │────▶│ effect::apply│────▶│ FlowGraph::solve │──▶ state per instruction
//! │ + regions    │     │ (per opcode) │     │ (worklist merge) │
//! └──────────────┘     └──────────────┘     └──────────────────┘
//! ```
//!
//! Every instruction gets the merged [`StackFrameState`] of all incoming
//! edges: fall-through, branches and handler entries. Instructions no edge
//! reaches stay [`StackFrameState::Dead`].

pub mod effect;
pub mod graph;
pub mod state;
pub mod value_source;

pub use graph::{initial_state, FlowGraph};
pub use state::{DepthMismatch, LiveState, StackFrameState};
pub use value_source::ValueSource;
