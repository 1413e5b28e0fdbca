//! Loader trait for writing items to a destination

use eyre::Result;

/// Loader trait for loading items to a destination
///
/// A loader receives the complete, already transformed batch. Nothing is
/// written until every item has made it through the transform stage.
///
/// # Example
/// ```no_run
/// use zillow_etl::etl::Loader;
/// use eyre::Result;
/// use std::path::PathBuf;
///
/// struct LineLoader {
///     path: PathBuf,
/// }
///
/// impl Loader for LineLoader {
///     type Item = String;
///
///     async fn load(&self, items: Vec<Self::Item>) -> Result<usize> {
///         std::fs::write(&self.path, items.join("\n"))?;
///         Ok(items.len())
///     }
/// }
/// ```
pub trait Loader: Send + Sync {
    /// The type of items to load
    type Item: Send;

    /// Load items to the destination
    ///
    /// Returns the number of items successfully loaded
    ///
    /// # Errors
    /// Returns an error if loading fails (network, I/O, validation, etc.)
    fn load(&self, items: Vec<Self::Item>)
    -> impl std::future::Future<Output = Result<usize>> + Send;
}
