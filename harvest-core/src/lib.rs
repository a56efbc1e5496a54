//! Harvest Core
//!
//! Core types shared by the Harvest completion service, its CLI and the
//! workers that execute experiments.
//!
//! This crate contains:
//! - Domain types: Experiment records, artifacts, cloud/queue selection
//! - DTOs: Requests and messages exchanged with the directory and queues

pub mod domain;
pub mod dto;
