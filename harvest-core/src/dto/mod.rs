//! Data Transfer Objects
//!
//! Lightweight structures handed to the experiment directory and to the
//! queue transports.

pub mod experiment;
