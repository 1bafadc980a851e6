//! Streaming facade between a frontend and a managed analysis agent.

pub mod artifacts;
pub mod classify;
pub mod cli;
pub mod formats;
pub mod image;
pub mod normalize;
pub mod prompt;
pub mod relay;
pub mod router;
pub mod sessions;
