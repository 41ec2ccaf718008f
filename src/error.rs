use thiserror::Error as ThisError;

/// Diagnostic information reported by the native driver for a failed call.
///
/// Carries the native error code and message verbatim. Instances are only ever
/// produced by the blocking driver calls and travel to the caller through the
/// asynchronous completion path, wrapped in [`Error::Driver`].
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("[{code}] {message}")]
pub struct DriverError {
    /// Native error code as reported by the driver.
    pub code: i32,
    /// Message text emitted by the driver.
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        DriverError {
            code,
            message: message.into(),
        }
    }
}

/// Error type for all result set operations.
///
/// The first three variants are validation errors. They are detected before
/// any work is submitted and returned without touching the native layer.
/// [`Error::Driver`] on the other hand originates from a blocking native call
/// and is always delivered through the asynchronous completion path. Every
/// operation resolves exactly once, with either a result or a single error.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A parameter failed validation. Currently exclusively emitted for row
    /// counts passed to fetch operations, which must be at least one.
    #[error("Invalid value for parameter {index}. Fetch operations require a row count of at \
        least one. To check for end of data fetch a single row and inspect the result instead.")]
    InvalidParameter {
        /// One based position of the offending parameter.
        index: usize,
    },
    /// A fetch or close has been requested while another one is still in
    /// flight. Requests are rejected rather than queued. Retry once the
    /// active operation resolved.
    #[error("The result set is busy with a previous operation. Concurrent fetch or close \
        requests on the same result set are rejected. Await the outstanding call, then retry.")]
    BusyResultSet,
    /// The result set can no longer be used. Either it has been closed, or
    /// the connection owning its cursor is gone.
    #[error("Invalid result set. It has either been closed already, or the connection owning \
        its cursor is no longer usable.")]
    InvalidResultSet,
    /// A blocking native call failed. The native diagnostic is attached.
    #[error("The native driver reported an error:\n{0}")]
    Driver(#[from] DriverError),
}
