//! Shared Slot Storage
//!
//! A keyed string store both sides of an event boundary can reach. The
//! request bridge uses it as its rendezvous: the requester polls a slot named
//! after its correlation id, whoever fulfils the request writes the answer
//! there.

use async_trait::async_trait;

use crate::error::Result;

/// Keyed slot store trait
///
/// Abstracts whatever shared state the host exposes to both execution
/// contexts:
/// - Desktop: in-process map or a SQLite file shared between processes
/// - Embedded hosts: window/global properties
///
/// Reading an absent slot is not an error; it yields an empty string, which
/// callers treat as "not yet written".
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SlotStore;
///
/// async fn answer(store: &dyn SlotStore, key: &str) -> Result<()> {
///     store.write(key, r#"{"status":200}"#).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Read a slot, returning an empty string when it is absent
    async fn read(&self, key: &str) -> Result<String>;

    /// Write a slot, replacing any previous value
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Clear a slot so it reads empty again
    async fn clear(&self, key: &str) -> Result<()>;

    /// Check if a slot currently holds a non-empty value
    async fn is_filled(&self, key: &str) -> Result<bool> {
        Ok(!self.read(key).await?.is_empty())
    }
}
