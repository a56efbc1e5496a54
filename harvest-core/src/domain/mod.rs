//! Core domain types
//!
//! These types describe the durable state shared between the submitting
//! client (which creates experiments and polls them) and the workers
//! (which execute experiments and publish their results).

pub mod artifact;
pub mod cloud;
pub mod experiment;
pub mod resources;
