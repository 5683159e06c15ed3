//! Temporary payload storage.

pub mod quota;

pub use quota::{EvictionReport, ExtensionUsage, QuotaError, QuotaManager, StorageSnapshot};
