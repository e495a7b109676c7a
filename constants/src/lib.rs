//! Shared constants for the attribute engine, the section preview scheduler
//! and the viewer.

pub mod colour;
pub mod host;
pub mod layout;
pub mod preview;
pub mod render_settings;
