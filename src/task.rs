use std::cmp::min;

use log::debug;

use crate::{
    driver::{Driver, FetchOutcome, MaterializeRows, RowShape},
    error::DriverError,
    handle::StatementHandle,
};

/// A single logical fetch request, as it travels across worker rounds.
///
/// The task borrows the controllers statement handle for the duration of the
/// logical call and carries the loop state of the batch continuation protocol:
/// the number of rows still owed to the caller and the rows gathered so far.
/// Each native round trip is one submitted unit of work. If a round leaves the
/// request unsatisfied while the cursor still has rows, the finished task is
/// consumed into a continuation which inherits the in flight status, rather
/// than nesting callbacks.
pub struct FetchTask<D: Driver> {
    handle: StatementHandle<D>,
    /// Rows still owed to the caller. At least one at creation, zero row
    /// requests are rejected before a task exists.
    remaining: u32,
    /// Upper bound for a single native round trip.
    batch_size: u32,
    /// Rows gathered by previous rounds, in native round trip order.
    rows: Vec<D::Row>,
}

/// What a finished worker round means for the logical request.
pub enum FetchProgress<D: Driver> {
    /// The request is satisfied or the cursor is exhausted. The handle goes
    /// back to the controller, the rows to the caller.
    Done {
        handle: StatementHandle<D>,
        rows: Vec<D::Row>,
    },
    /// More rows are owed and the cursor has more to give. Resubmit through
    /// the same worker path.
    Continue(FetchTask<D>),
}

impl<D: Driver> FetchTask<D> {
    pub fn new(handle: StatementHandle<D>, requested: u32, batch_size: u32) -> Self {
        debug_assert!(requested >= 1);
        FetchTask {
            handle,
            remaining: requested,
            batch_size,
            rows: Vec::new(),
        }
    }

    /// Liveness of the connection owning the lent handle.
    pub fn is_owner_usable(&self) -> bool {
        self.handle.is_owner_usable()
    }

    /// Hands the lent handle back, discarding any gathered rows. Used on the
    /// error path, partial results are never delivered together with an
    /// error.
    pub fn into_handle(self) -> StatementHandle<D> {
        self.handle
    }

    /// Worker phase: one blocking native round trip. Runs off the async
    /// executor and touches nothing but the handle it was given, controller
    /// state may be inspected concurrently by other callers in the meantime.
    pub fn fetch_round(mut self) -> (Self, Result<FetchOutcome<D::Buffers>, DriverError>) {
        let want = min(self.remaining, self.batch_size);
        let result = self.handle.fetch(want);
        (self, result)
    }

    /// Completion phase: materialize the batch and decide whether the logical
    /// request is satisfied.
    ///
    /// Delivery happens once the cursor reports no further rows or the
    /// requested count is reached. Otherwise the task turns into a
    /// continuation owing the remainder, pre seeded with the rows gathered so
    /// far.
    pub fn complete_round(
        mut self,
        outcome: FetchOutcome<D::Buffers>,
        materializer: &D::Materializer,
        shape: RowShape,
        columns: &[D::Column],
    ) -> Result<FetchProgress<D>, (StatementHandle<D>, DriverError)> {
        let FetchOutcome {
            buffers,
            rows_fetched,
            more_rows,
        } = outcome;
        let batch = match materializer.rows(buffers, shape, columns) {
            Ok(batch) => batch,
            Err(error) => return Err((self.handle, error)),
        };
        self.remaining = self.remaining.saturating_sub(rows_fetched);
        self.rows.extend(batch);
        if more_rows && self.remaining > 0 {
            debug!(
                "fetch round complete: {} rows gathered, {} still owed, resubmitting",
                self.rows.len(),
                self.remaining
            );
            Ok(FetchProgress::Continue(self.continuation()))
        } else {
            Ok(FetchProgress::Done {
                handle: self.handle,
                rows: self.rows,
            })
        }
    }

    /// Follow up task owing the remainder of the request. Takes over the
    /// handle and the gathered rows from the finished round.
    fn continuation(self) -> Self {
        FetchTask {
            handle: self.handle,
            remaining: self.remaining,
            batch_size: self.batch_size,
            rows: self.rows,
        }
    }
}

/// A close request. Owns the handle transferred out of the controller at
/// accept time, which is what makes the result set observably invalid before
/// the native call even starts.
pub struct CloseTask<D: Driver> {
    handle: StatementHandle<D>,
}

impl<D: Driver> CloseTask<D> {
    pub fn new(handle: StatementHandle<D>) -> Self {
        CloseTask { handle }
    }

    /// Worker phase: blocking native close. On failure the handle survives
    /// and must be re-attached to the controller, the result set stays usable
    /// and nothing leaks.
    pub fn run(self) -> Result<(), (StatementHandle<D>, DriverError)> {
        self.handle.close()
    }
}
