//! Persistence boundary.

use crate::error::RepositoryError;
use crate::instance::Instance;
use async_trait::async_trait;

/// Stores instances on behalf of the engine.
///
/// Implementations must persist the current state and the history atomically
/// and compare [`Instance::concurrency_token`] with the stored token,
/// failing with [`RepositoryError::ConcurrencyConflict`] on mismatch.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Saves `instance` and returns its new concurrency token.
    async fn save_instance(&self, instance: &Instance) -> Result<u64, RepositoryError>;
}
