//! Per-thread and per-universe runtime state: the evaluation stack and
//! call-frame chain ([`execution_state`], [`call_frame`]) and the shared
//! singletons one `GlobalState` anchors for every coroutine inside it
//! ([`global_state`]).

pub mod call_frame;
pub mod execution_state;
pub mod global_state;
