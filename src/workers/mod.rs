//! Output workers fed by the present stage
//!
//! This module contains the recording sink, the broadcast fan-out and the
//! HTTP endpoint that serves it.

pub mod http;
pub mod recorder;
pub mod streamer;

pub use recorder::RecordingSink;
pub use streamer::{BroadcastServer, Subscription};
