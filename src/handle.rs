use std::sync::Weak;

use crate::{
    driver::{Connection, Driver, FetchOutcome, Statement},
    error::DriverError,
};

/// Owned reference to a native statement in cursor state, together with a non
/// owning view on the connection it belongs to.
///
/// The handle is the unit of ownership transfer inside the engine. It moves
/// from the execution context into the controller, from the controller into a
/// fetch task for the duration of a logical call, and into the close task when
/// a close is accepted. At any instant exactly one owner is responsible for
/// releasing the native reference, which happens either through a successful
/// [`StatementHandle::close`] or when the handle is dropped.
pub struct StatementHandle<D: Driver> {
    stmt: D::Statement,
    /// Owning connection. Held weakly: the handle may look the connection up
    /// to ask for liveness, but must never extend its lifetime.
    conn: Weak<D::Connection>,
}

impl<D: Driver> StatementHandle<D> {
    /// Takes over an existing native reference. The native reference count is
    /// left untouched, the previous owner merely hands its unit over. Used
    /// when a query execution turns its cursor into a result set.
    pub fn adopt(stmt: D::Statement, conn: Weak<D::Connection>) -> Self {
        StatementHandle { stmt, conn }
    }

    /// Creates an independently released handle over a statement that stays
    /// owned elsewhere, by incrementing the native reference count. Used when
    /// a reference cursor output value becomes a result set of its own: the
    /// source cursor and the new result set then release independently.
    pub fn acquire(stmt: &D::Statement, conn: Weak<D::Connection>) -> Result<Self, DriverError> {
        let stmt = stmt.add_ref()?;
        Ok(StatementHandle { stmt, conn })
    }

    /// Liveness of the owning connection. A statement on a dead connection is
    /// never usable. Callers must ask again before every native round trip,
    /// liveness observed earlier proves nothing.
    pub fn is_owner_usable(&self) -> bool {
        self.conn.upgrade().is_some_and(|conn| conn.is_usable())
    }

    /// One blocking fetch round trip on the native statement.
    pub fn fetch(&mut self, max_rows: u32) -> Result<FetchOutcome<D::Buffers>, DriverError> {
        self.stmt.fetch(max_rows)
    }

    /// Closes the server side cursor. Blocking.
    ///
    /// On success the handle is consumed and its native reference released,
    /// which makes any later validity check on the owning result set
    /// deterministic. On failure ownership reverts to the caller together
    /// with the native diagnostic, so the close can be retried and the native
    /// resource does not leak.
    pub fn close(mut self) -> Result<(), (Self, DriverError)> {
        match self.stmt.close() {
            Ok(()) => Ok(()),
            Err(error) => Err((self, error)),
        }
    }
}
