//! # Cover Studio Common Library
//!
//! Shared code for the Cover Studio job services including:
//! - Error type shared by configuration and event plumbing
//! - Job event types (JobEvent enum) and the broadcast EventBus
//! - Bootstrap TOML configuration loading
//! - Fade curve definitions used for segment crossfades

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
