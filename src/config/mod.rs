//! Configuration and shared types
//!
//! Runner settings, their validation, ecosystem presets and the data model.

pub mod presets;
pub mod settings;
pub mod types;
pub mod validator;
