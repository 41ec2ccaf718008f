//! # rowset
//!
//! Streams rows from a server side cursor of a blocking database driver,
//! presenting every fetch as one logical asynchronous call.
//!
//! The engine owns the native statement reference for one result set,
//! serializes fetch and close requests against it and transparently continues
//! fetching across the drivers internal batch boundaries until the requested
//! row count is satisfied or the cursor is exhausted. The driver itself, the
//! connection it belongs to and the conversion of raw fetch buffers into rows
//! are all injected through the [`Driver`] family of traits, the crate links
//! no database client library.

mod driver;
mod error;
mod handle;
mod result_set;
mod task;

pub use self::{
    driver::{Connection, Driver, FetchOutcome, MaterializeRows, RowShape, Statement},
    error::{DriverError, Error},
    result_set::{ExecutionContext, Metadata, ResultSet},
};
