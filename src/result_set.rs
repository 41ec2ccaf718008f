use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, warn};
use tokio::{sync::oneshot, task};

use crate::{
    driver::{Connection, Driver, RowShape},
    error::Error,
    handle::StatementHandle,
    task::{CloseTask, FetchProgress, FetchTask},
};

/// Everything the query execution layer fixes when a cursor becomes a result
/// set. Ownership of the descriptor array and the materializer is transferred
/// exactly once, at construction.
pub struct ExecutionContext<D: Driver> {
    /// Connection owning the cursor. Weak: the result set looks it up to
    /// check liveness, it does not keep it alive.
    pub connection: Weak<D::Connection>,
    /// Column descriptors of the query, fixed for the lifetime of the result
    /// set. Metadata is derived from these.
    pub columns: Vec<D::Column>,
    /// Shape of the rows handed to the caller.
    pub shape: RowShape,
    /// Rows the native layer retrieves per round trip. Must be at least one.
    pub fetch_array_size: u32,
    /// Whether metadata should report the extended column attributes.
    pub extended_metadata: bool,
    /// Converts raw fetch buffers into caller visible rows.
    pub materializer: D::Materializer,
}

/// Read only metadata view, derived from the descriptors fixed at
/// construction.
pub struct Metadata<D: Driver> {
    columns: Arc<[D::Column]>,
    extended: bool,
}

impl<D: Driver> Metadata<D> {
    pub fn columns(&self) -> &[D::Column] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// `true` if the result set was created with extended metadata enabled
    /// and consumers should render the extended column attributes.
    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

/// Lifecycle of a result set. Doubles as the active task marker: the two
/// pending states mean exactly one task is in flight and new requests must be
/// rejected as busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    FetchPending,
    ClosePending,
    Closed,
}

struct State<D: Driver> {
    phase: Phase,
    /// Present while idle. `None` while the handle is lent to an in flight
    /// task, and forever once the result set is closed.
    handle: Option<StatementHandle<D>>,
    /// Dropped together with the cursor when the close succeeds.
    columns: Option<Arc<[D::Column]>>,
}

struct Shared<D: Driver> {
    state: Mutex<State<D>>,
    connection: Weak<D::Connection>,
    shape: RowShape,
    fetch_array_size: u32,
    extended_metadata: bool,
    materializer: D::Materializer,
}

/// Stateful owner of a server side cursor, streaming its rows in batches.
///
/// A result set accepts at most one fetch or close at a time. Requests made
/// while another one is in flight fail fast with [`Error::BusyResultSet`],
/// they are neither queued nor blocked on. A single logical fetch may span
/// several native round trips, the engine resubmits continuation work until
/// the requested row count is satisfied or the cursor is exhausted, and only
/// then resolves the callers future.
///
/// All methods take `&self`. Share the result set between tasks by wrapping
/// it in an [`Arc`].
pub struct ResultSet<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> ResultSet<D> {
    /// Result set over a cursor produced by executing a query. Takes over the
    /// native statement reference from the execution context.
    pub fn from_execution(statement: D::Statement, context: ExecutionContext<D>) -> Self {
        let handle = StatementHandle::adopt(statement, context.connection.clone());
        Self::with_handle(handle, context)
    }

    /// Result set over a statement that stays owned elsewhere, typically a
    /// reference cursor bound as an output value. Acquires an independent
    /// native reference, so this result set and the source cursor close and
    /// release independently of each other.
    pub fn from_ref_cursor(
        statement: &D::Statement,
        context: ExecutionContext<D>,
    ) -> Result<Self, Error> {
        let handle = StatementHandle::acquire(statement, context.connection.clone())
            .map_err(Error::Driver)?;
        Ok(Self::with_handle(handle, context))
    }

    fn with_handle(handle: StatementHandle<D>, context: ExecutionContext<D>) -> Self {
        assert_ne!(
            context.fetch_array_size, 0,
            "fetch array size must be at least one"
        );
        ResultSet {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    handle: Some(handle),
                    columns: Some(context.columns.into()),
                }),
                connection: context.connection,
                shape: context.shape,
                fetch_array_size: context.fetch_array_size,
                extended_metadata: context.extended_metadata,
                materializer: context.materializer,
            }),
        }
    }

    /// Retrieves the next row of the result set. `Ok(None)` is end of data.
    ///
    /// Fails with [`Error::BusyResultSet`] if another fetch or close is in
    /// flight, and with [`Error::InvalidResultSet`] once the result set is
    /// closed or its connection is gone.
    pub async fn fetch_one(&self) -> Result<Option<D::Row>, Error> {
        let rows = self.run_fetch(1).await?;
        Ok(rows.into_iter().next())
    }

    /// Retrieves up to `max_rows` rows, in cursor order.
    ///
    /// Delivers fewer rows than requested only if the cursor is exhausted.
    /// Once exhausted, further calls keep delivering empty batches until the
    /// result set is closed. `max_rows` must be at least one.
    pub async fn fetch_many(&self, max_rows: u32) -> Result<Vec<D::Row>, Error> {
        if max_rows == 0 {
            return Err(Error::InvalidParameter { index: 1 });
        }
        self.run_fetch(max_rows).await
    }

    /// Closes the result set, releasing the server side cursor.
    ///
    /// The statement handle moves into the close task the moment the request
    /// is accepted, so the result set is observably invalid from that point
    /// on, not only once the native close returns. Should the native close
    /// fail, the handle is re-attached and the result set is left in the same
    /// usable state it was in before the attempt, retrying is safe.
    ///
    /// Fails with [`Error::BusyResultSet`] while a fetch is in flight, a
    /// pending fetch is never cancelled.
    pub async fn close(&self) -> Result<(), Error> {
        let close_task = {
            let mut state = self.lock_state();
            match state.phase {
                Phase::Closed => return Err(Error::InvalidResultSet),
                Phase::FetchPending | Phase::ClosePending => return Err(Error::BusyResultSet),
                Phase::Idle => {
                    let handle = Self::take_handle(&mut state);
                    if !handle.is_owner_usable() {
                        state.handle = Some(handle);
                        return Err(Error::InvalidResultSet);
                    }
                    state.phase = Phase::ClosePending;
                    CloseTask::new(handle)
                }
            }
        };
        let (send_outcome, receive_outcome) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        task::spawn(async move {
            let result = task::spawn_blocking(move || close_task.run())
                .await
                .expect("blocking close worker panicked");
            let outcome = {
                let mut state = shared.state.lock().expect(STATE_POISONED);
                match result {
                    Ok(()) => {
                        state.phase = Phase::Closed;
                        // Descriptors are discarded together with the cursor.
                        state.columns = None;
                        Ok(())
                    }
                    Err((handle, error)) => {
                        warn!("closing result set failed, statement handle re-attached: {error}");
                        state.handle = Some(handle);
                        state.phase = Phase::Idle;
                        Err(Error::Driver(error))
                    }
                }
            };
            // The caller may have dropped its future, the state above is
            // consistent either way.
            let _ = send_outcome.send(outcome);
        });
        receive_outcome
            .await
            .expect("close task dropped its completion channel")
    }

    /// Column metadata of the result set. Synchronous and read only.
    ///
    /// Fails with [`Error::InvalidResultSet`] once the descriptors have been
    /// discarded, that is from the moment a close has been accepted.
    pub fn metadata(&self) -> Result<Metadata<D>, Error> {
        let state = self.lock_state();
        match state.phase {
            Phase::ClosePending | Phase::Closed => Err(Error::InvalidResultSet),
            Phase::Idle | Phase::FetchPending => {
                let columns = state
                    .columns
                    .as_ref()
                    .expect("open result set keeps its column descriptors");
                Ok(Metadata {
                    columns: Arc::clone(columns),
                    extended: self.shared.extended_metadata,
                })
            }
        }
    }

    /// `true` while the result set can accept requests eventually: it is not
    /// closed, no close is in flight and the owning connection is alive. A
    /// result set busy with a fetch counts as usable.
    pub fn is_usable(&self) -> bool {
        let phase = self.lock_state().phase;
        !matches!(phase, Phase::ClosePending | Phase::Closed)
            && self
                .shared
                .connection
                .upgrade()
                .is_some_and(|conn| conn.is_usable())
    }

    /// Validates and accepts a fetch request. The phase flips to pending
    /// inside the lock, so a concurrent request observed after acceptance
    /// deterministically sees busy, even before the worker phase started.
    fn begin_fetch(&self, requested: u32) -> Result<(FetchTask<D>, Arc<[D::Column]>), Error> {
        let mut state = self.lock_state();
        match state.phase {
            Phase::Closed => Err(Error::InvalidResultSet),
            Phase::FetchPending | Phase::ClosePending => Err(Error::BusyResultSet),
            Phase::Idle => {
                let handle = Self::take_handle(&mut state);
                if !handle.is_owner_usable() {
                    state.handle = Some(handle);
                    return Err(Error::InvalidResultSet);
                }
                let columns = Arc::clone(
                    state
                        .columns
                        .as_ref()
                        .expect("open result set keeps its column descriptors"),
                );
                state.phase = Phase::FetchPending;
                debug!("fetch accepted, requesting {requested} rows");
                Ok((
                    FetchTask::new(handle, requested, self.shared.fetch_array_size),
                    columns,
                ))
            }
        }
    }

    /// Submits an accepted fetch and awaits its single resolution. The work
    /// is driven by a detached task: dropping the returned future abandons
    /// only the completion channel, the in flight rounds still run and
    /// restore the controller state.
    async fn run_fetch(&self, requested: u32) -> Result<Vec<D::Row>, Error> {
        let (fetch_task, columns) = self.begin_fetch(requested)?;
        let (send_outcome, receive_outcome) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        task::spawn(async move {
            let outcome = Self::drive_fetch(&shared, fetch_task, columns).await;
            let _ = send_outcome.send(outcome);
        });
        receive_outcome
            .await
            .expect("fetch task dropped its completion channel")
    }

    /// Runs worker and completion phases until the logical request resolves.
    /// Each native round trip is a separate unit of blocking work, the
    /// continuation protocol decides between delivery and resubmission.
    async fn drive_fetch(
        shared: &Arc<Shared<D>>,
        mut fetch_task: FetchTask<D>,
        columns: Arc<[D::Column]>,
    ) -> Result<Vec<D::Row>, Error> {
        loop {
            // The connection may have died since the previous round trip.
            if !fetch_task.is_owner_usable() {
                Self::finish_fetch(shared, fetch_task.into_handle());
                return Err(Error::InvalidResultSet);
            }
            let (returned, result) = task::spawn_blocking(move || fetch_task.fetch_round())
                .await
                .expect("blocking fetch worker panicked");
            fetch_task = returned;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(error) => {
                    Self::finish_fetch(shared, fetch_task.into_handle());
                    return Err(Error::Driver(error));
                }
            };
            match fetch_task.complete_round(outcome, &shared.materializer, shared.shape, &columns)
            {
                Ok(FetchProgress::Done { handle, rows }) => {
                    Self::finish_fetch(shared, handle);
                    return Ok(rows);
                }
                Ok(FetchProgress::Continue(continuation)) => fetch_task = continuation,
                Err((handle, error)) => {
                    Self::finish_fetch(shared, handle);
                    return Err(Error::Driver(error));
                }
            }
        }
    }

    /// Completion epilogue shared by the success and error paths: the lent
    /// handle returns to the controller and the active marker clears.
    fn finish_fetch(shared: &Arc<Shared<D>>, handle: StatementHandle<D>) {
        let mut state = shared.state.lock().expect(STATE_POISONED);
        debug_assert_eq!(state.phase, Phase::FetchPending);
        state.handle = Some(handle);
        state.phase = Phase::Idle;
    }

    fn take_handle(state: &mut State<D>) -> StatementHandle<D> {
        state
            .handle
            .take()
            .expect("idle result set owns its statement handle")
    }

    fn lock_state(&self) -> MutexGuard<'_, State<D>> {
        self.shared.state.lock().expect(STATE_POISONED)
    }
}

const STATE_POISONED: &str = "result set state lock must not be poisoned";
