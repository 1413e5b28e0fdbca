//! Transformer trait for data transformation

use eyre::Result;

/// Transformer trait for transforming data items
///
/// Implementors define how to transform items:
/// - Projection onto a fixed set of fields
/// - Format conversion
/// - Validation
///
/// # Example
/// ```no_run
/// use zillow_etl::etl::Transformer;
/// use eyre::Result;
///
/// struct FieldDropper {
///     fields: Vec<String>,
/// }
///
/// impl Transformer for FieldDropper {
///     type Input = serde_json::Value;
///     type Output = serde_json::Value;
///
///     fn transform(&self, mut input: Self::Input) -> Result<Self::Output> {
///         if let Some(obj) = input.as_object_mut() {
///             for field in &self.fields {
///                 obj.remove(field);
///             }
///         }
///         Ok(input)
///     }
/// }
/// ```
pub trait Transformer: Send + Sync {
    /// Input item type
    type Input: Send;

    /// Output item type after transformation
    type Output: Send;

    /// Transform a single item
    ///
    /// # Errors
    /// Returns an error if transformation fails (validation, conversion, etc.)
    fn transform(&self, input: Self::Input) -> Result<Self::Output>;

    /// Transform multiple items (default batch implementation)
    ///
    /// Stops at the first failing item; the whole batch fails with it.
    fn transform_many(&self, inputs: Vec<Self::Input>) -> Result<Vec<Self::Output>> {
        inputs.into_iter().map(|i| self.transform(i)).collect()
    }
}
