//! # nci-types
//!
//! Core types shared by the ncinet model-selection crates: the error
//! taxonomy, parameter values, session configuration and the override
//! merge that derives per-point configurations from a base.

pub mod config;
pub mod errors;
pub mod overrides;
pub mod params;

pub use config::*;
pub use errors::*;
pub use overrides::apply_overrides;
pub use params::{Assignment, ParamValue};
