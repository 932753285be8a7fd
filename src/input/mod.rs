//! Input events, the shared input layout and the per-cycle coalescer

mod coalesce;
mod events;
mod layout;
mod snapshot;

pub use coalesce::update_input_buffer_with_events;
pub use events::*;
pub use layout::*;
pub use snapshot::{read_input_snapshot, InputSnapshot};
