//! CLI command implementations

pub mod ensure;
pub mod size;
pub mod status;
