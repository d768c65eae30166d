//! Buffer state shared between `append`, the flush loop, and `drain`.
//!
//! Guarded by `tokio::sync::Mutex` rather than `parking_lot`: the critical
//! section in `append` spans an async round-trip to the store
//! (`reserve_sequence_nums`), and holding a `parking_lot` guard across an
//! `.await` is exactly the anti-pattern that primitive warns against.

use akashi_core::AgentEvent;
use std::collections::VecDeque;

#[derive(Default)]
pub(crate) struct State {
    pub(crate) buffer: VecDeque<AgentEvent>,
    pub(crate) draining: bool,
}
