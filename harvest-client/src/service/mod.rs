//! Service layer
//!
//! Sessions built on top of the repository layer. A `CompletionService`
//! owns submission and polling for one experiment group; the manager keeps
//! one session per group.

mod completion;
mod manager;

pub use completion::{CompletionService, PROJECT_PREFIX, Timeout};
pub use manager::CompletionServiceManager;
