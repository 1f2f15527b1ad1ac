//! Result type alias for bulkfetch
//!
//! This module provides a convenient Result type alias that uses BulkFetchError
//! as the error type.

use super::errors::BulkFetchError;

/// Result type alias for bulkfetch operations
///
/// # Examples
///
/// ```
/// use bulkfetch::domain::result::Result;
/// use bulkfetch::domain::errors::BulkFetchError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(BulkFetchError::Configuration("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, BulkFetchError>;
