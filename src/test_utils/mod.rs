//! Helpers for testing code built on the watchers: an in-memory [`MockProvider`] chain and a
//! [`Recorder`] turning callbacks into assertable streams.

pub mod macros;
mod mock;

pub use macros::{Recorder, recorder};
pub use mock::{MockProvider, tx_hash};
