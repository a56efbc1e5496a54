//! Harvest Client
//!
//! Client side of the Harvest distributed work platform. A caller submits
//! units of work (client code plus serialized arguments) to a pool of
//! workers and collects their results as they finish.
//!
//! # Example
//!
//! ```no_run
//! use harvest_client::{Backends, CompletionService, Config};
//! use harvest_client::repository::{FsExperimentDirectory, SpoolTransports};
//! use std::sync::Arc;
//!
//! # async fn example() -> harvest_client::Result<()> {
//! let directory = FsExperimentDirectory::open(".harvest/directory").await?;
//! let backends = Backends::new(
//!     Arc::new(directory),
//!     Arc::new(SpoolTransports::new(".harvest/queues")),
//! );
//!
//! let mut service = CompletionService::start("exp1", Config::default(), backends).await?;
//! let key = service.submit("train.py", &serde_json::json!({ "lr": 0.01 })).await?;
//!
//! if let Some((finished, loss)) = service.get_results::<f64>(true).await? {
//!     println!("{} -> {}", finished, loss);
//! }
//! # let _ = key;
//! service.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod repository;
pub mod service;
pub mod workspace;

pub use config::{Config, Verbosity};
pub use error::{CompletionError, Result};
pub use repository::Backends;
pub use service::{CompletionService, CompletionServiceManager, Timeout};
