//! Domain model module declarations.

pub mod boot;
pub mod daemon;
pub mod project;
