//! Source audio held in memory and sliced per chunk window.

pub mod wav;

pub use wav::{AudioInput, resample};
