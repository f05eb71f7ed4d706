#![cfg_attr(not(test), no_std)]

//! Offline continuity engine for the BabyPod tracker.
//!
//! The flow layer hands mutating actions to [`sync::SyncCoordinator`], which
//! either forwards them to the Baby Buddy server or buffers them in the
//! durable [`queue::RecordLog`] until connectivity returns.

pub mod cache;
pub mod clock;
pub mod mode;
pub mod queue;
pub mod remote;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod time;
pub mod tracking;
