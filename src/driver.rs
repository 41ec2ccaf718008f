//! Seams towards the native database driver.
//!
//! Two decisions are already baked into this module:
//!
//! * All driver calls are blocking. The engine never invokes them on an async
//!   executor thread, only from a worker context.
//! * Reference counting of the native statement is the driver's business. This
//!   crate only demands that an owned [`Statement`] value releases its
//!   reference when dropped and can mint an independent sibling reference via
//!   [`Statement::add_ref`].

use crate::error::DriverError;

/// Outcome of one blocking fetch round trip to the native layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome<B> {
    /// Raw fetch buffers filled by the native call. Opaque to this crate, the
    /// drivers [`MaterializeRows`] implementation turns them into rows.
    pub buffers: B,
    /// Number of rows the native layer placed into the buffers. May be less
    /// than requested, the internal array fetch size of the driver bounds a
    /// single round trip.
    pub rows_fetched: u32,
    /// `true` if the cursor may hold further rows beyond this batch. `false`
    /// means the cursor is exhausted.
    pub more_rows: bool,
}

/// Selects the shape of the rows handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    /// Each row is an ordered sequence of column values.
    Array,
    /// Each row maps column names to values.
    Object,
}

/// Liveness view on the connection owning a statement.
///
/// The engine holds connections weakly and re-validates liveness before every
/// native call. It never extends a connections lifetime.
pub trait Connection: Send + Sync + 'static {
    /// `false` once the connection has been closed or is known to be broken.
    /// A statement on a dead connection is never usable, even if it has not
    /// been explicitly closed.
    fn is_usable(&self) -> bool;
}

/// An owned reference to a native statement in cursor state.
///
/// Values of this type stand for one unit of the native reference count.
/// Dropping a value must release exactly that one reference. The server side
/// cursor itself is shared between all references and closed through
/// [`Statement::close`].
pub trait Statement: Send + Sized + 'static {
    /// Raw payload of one fetch round trip, handed to [`MaterializeRows`].
    type Buffers: Send + 'static;

    /// Creates a second, independently released reference to the same native
    /// statement. Fails if the native handle is no longer valid.
    fn add_ref(&self) -> Result<Self, DriverError>;

    /// Closes the server side cursor. Blocking. On failure the statement
    /// stays open and further calls on it remain legal, so the operation can
    /// be retried.
    fn close(&mut self) -> Result<(), DriverError>;

    /// Retrieves up to `max_rows` rows from the cursor. Blocking. The native
    /// layer is free to return fewer rows than requested. An exhausted cursor
    /// reports zero rows and `more_rows == false` rather than an error.
    fn fetch(&mut self, max_rows: u32) -> Result<FetchOutcome<Self::Buffers>, DriverError>;
}

/// Converts the raw buffers of one fetch round trip into caller visible rows.
///
/// The engine treats this as an opaque function. It is invoked once per round
/// trip during the completion phase, never from the blocking worker context.
pub trait MaterializeRows<D: Driver>: Send + Sync + 'static {
    fn rows(
        &self,
        buffers: D::Buffers,
        shape: RowShape,
        columns: &[D::Column],
    ) -> Result<Vec<D::Row>, DriverError>;
}

/// Binds the native types of one driver integration together.
///
/// Implemented once per driver. The engine is generic over this bundle and
/// contains no knowledge of any concrete database client library.
pub trait Driver: Sized + 'static {
    /// Connection owning the statements of this driver.
    type Connection: Connection;
    /// Native statement reference in cursor state.
    type Statement: Statement<Buffers = Self::Buffers>;
    /// Raw payload of one native fetch round trip.
    type Buffers: Send + 'static;
    /// Column descriptor as produced by the execution layer. Opaque to the
    /// engine, it only stores and republishes these as metadata.
    type Column: Send + Sync + 'static;
    /// Caller visible row value.
    type Row: Send + 'static;
    /// Turns raw fetch buffers into rows.
    type Materializer: MaterializeRows<Self>;
}
