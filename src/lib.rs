//! Bookkeeping for index builds running inside a database server process.
//!
//! [`IndexBuildRegistry`] tracks every active build, bounds how many may run at
//! once, and lets any thread block until a build, a collection, a database or
//! the whole registry has drained. Every blocking call takes an
//! [`Interrupt`] so deadlines, kills and shutdown can cut it short.
//!
//! ```rust
//! use index_builds::{
//!     BuildId, BuildRecord, CollectionId, IndexBuildProtocol, IndexBuildRegistry, Namespace,
//!     OperationContext, RegistryConfig,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> index_builds::Result<()> {
//! let registry = IndexBuildRegistry::new(RegistryConfig::default());
//! let ctx = OperationContext::new();
//! let record = BuildRecord::new(
//!     BuildId::generate(),
//!     CollectionId::generate(),
//!     Namespace::new("shop", "orders"),
//!     IndexBuildProtocol::TwoPhase,
//!     vec!["sku_1".to_string()],
//! );
//!
//! registry.admit_and_register(Arc::clone(&record), 3, &ctx)?;
//! // ... build the index ...
//! registry.unregister(&record);
//! registry.await_all_stop(&ctx)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod interrupt;
pub mod registry;
pub mod stop_requests;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::RegistryConfig;
pub use error::{IndexBuildError, Result};
pub use interrupt::{Interrupt, InterruptReason, OperationContext, Uninterruptible};
pub use registry::admission::AdmissionSlot;
pub use registry::record::{BuildPhase, BuildRecord, BuildStatus, IndexBuildSummary};
pub use registry::{BuildTeardown, IndexBuildRegistry, NoopTeardown};
pub use stop_requests::{AllowAll, StopRequestOracle, StopRequests};
pub use types::{BuildId, CollectionId, IndexBuildProtocol, Namespace};
