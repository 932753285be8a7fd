//! emulator-bridge
//!
//! Lets a UI thread drive an emulator running on a separate worker thread
//! without either side blocking on the other: a fixed shared input layout
//! guarded by a four-state handoff lock, an ordered message fallback when
//! memory cannot be shared, and content-addressed chunk URLs for streaming
//! large disk images.

pub mod config;
pub mod disk;
pub mod error;
pub mod input;
pub mod logging;
pub mod persist;
pub mod sync;
pub mod transport;
pub mod worker;
