//! Suspend/resume coordination for a group of queries.
//!
//! A host that supports pausing its consumers asks the coordinator, on every
//! render, what to do with the current group: proceed with a complete result
//! list, pause until a coordinated refetch settles, or propagate a fatal
//! error to the nearest error boundary. Suspension is encoded as an explicit
//! [`RenderOutcome`] value the caller's control flow inspects, not as an
//! exception-like signal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::QueryError;
use crate::options::QueryOptions;
use crate::queries::{QueriesObserver, Settlement};
use crate::result::QueryResult;

/// Freshness window imposed on suspending queries with no explicit
/// `stale_time`, so data resolved during a suspension is not immediately
/// stale when the consumer re-mounts (which would suspend again, forever).
pub const DEFAULT_SUSPENSE_STALE_TIME: Duration = Duration::from_secs(1);

/// Latch tracking whether the caller has acknowledged a prior fatal error.
///
/// Starts closed. [`ErrorResetBoundary::reset`] opens it, permitting exactly
/// one coordinated retry; the retry (or a further failure) closes it again
/// via [`ErrorResetBoundary::clear_reset`].
#[derive(Default)]
pub struct ErrorResetBoundary {
    is_reset: AtomicBool,
}

impl ErrorResetBoundary {
    /// Create a boundary with the gate closed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge the error and permit one retry.
    pub fn reset(&self) {
        self.is_reset.store(true, Ordering::Release);
    }

    /// Close the gate.
    pub fn clear_reset(&self) {
        self.is_reset.store(false, Ordering::Release);
    }

    /// Whether the gate is open.
    pub fn is_reset(&self) -> bool {
        self.is_reset.load(Ordering::Acquire)
    }
}

/// What the caller should do with the current render.
pub enum RenderOutcome {
    /// Proceed with the positionally-aligned results.
    Ready(Vec<QueryResult>),
    /// Pause; resume (and re-evaluate) once the future completes.
    Suspended(BoxFuture<'static, ()>),
    /// Propagate as a fatal error to the nearest error boundary.
    Thrown(QueryError),
}

impl fmt::Debug for RenderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderOutcome::Ready(results) => f.debug_tuple("Ready").field(results).finish(),
            RenderOutcome::Suspended(_) => f.write_str("Suspended"),
            RenderOutcome::Thrown(error) => f.debug_tuple("Thrown").field(error).finish(),
        }
    }
}

/// Decides, per render, whether a query group should suspend, proceed, or
/// fail, and drives the coordinated refetch that resolves a suspension.
#[derive(Clone, Default)]
pub struct SuspenseCoordinator {
    boundary: Arc<ErrorResetBoundary>,
}

impl SuspenseCoordinator {
    /// Create a coordinator with a fresh (closed) reset boundary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coordinator around an existing boundary, shared with the
    /// caller's error-surface UI.
    pub fn with_boundary(boundary: Arc<ErrorResetBoundary>) -> Self {
        Self { boundary }
    }

    /// The reset boundary this coordinator consults.
    pub fn boundary(&self) -> &Arc<ErrorResetBoundary> {
        &self.boundary
    }

    /// Apply group-wide defaulting to a descriptor list.
    ///
    /// Mixed per-query suspense configuration within one group is not
    /// supported: if any descriptor requests suspending mode, all are forced
    /// into it, and likewise for the error-boundary flag. Suspending
    /// descriptors without an explicit freshness window get
    /// [`DEFAULT_SUSPENSE_STALE_TIME`] and never refetch on mount; while the
    /// reset gate is closed, failed queries do not retry on mount either.
    pub fn prepare(&self, descriptors: &[QueryOptions]) -> Vec<QueryOptions> {
        let any_suspense = descriptors.iter().any(|d| d.suspense);
        let any_boundary = descriptors.iter().any(|d| d.use_error_boundary);
        let is_reset = self.boundary.is_reset();
        descriptors
            .iter()
            .cloned()
            .map(|mut d| {
                // Results must read as fetching before any subscription tick.
                d.optimistic_results = true;
                if any_suspense {
                    d.suspense = true;
                }
                if any_boundary {
                    d.use_error_boundary = true;
                }
                if d.suspense {
                    if d.stale_time.is_none() {
                        d.stale_time = Some(DEFAULT_SUSPENSE_STALE_TIME);
                    }
                    d.refetch_on_mount = false;
                }
                if (d.suspense || d.use_error_boundary) && !is_reset {
                    d.retry_on_mount = false;
                }
                d
            })
            .collect()
    }

    /// Evaluate the group for the current render.
    ///
    /// `descriptors` must already be prepared via [`Self::prepare`].
    pub fn evaluate(
        &self,
        observer: &QueriesObserver,
        descriptors: &[QueryOptions],
    ) -> RenderOutcome {
        let results = observer.get_optimistic_result(descriptors);
        let is_suspense = descriptors.iter().any(|d| d.suspense);
        let is_boundary = descriptors.iter().any(|d| d.use_error_boundary);
        if is_suspense || is_boundary {
            // First error by scan order over positions. Queries that settle
            // out of order may make this diverge from "first to actually
            // fail"; the scan-order rule is kept as specified.
            let first_error = results
                .iter()
                .find(|r| r.is_error())
                .and_then(|r| r.error.clone());
            if let Some(error) = first_error {
                if self.boundary.is_reset() {
                    tracing::debug!("error present and gate open; refetching");
                    return RenderOutcome::Suspended(self.suspend(observer, descriptors));
                }
                self.boundary.clear_reset();
                tracing::debug!(%error, "propagating to error boundary");
                return RenderOutcome::Thrown(error);
            }
            if is_suspense && results.iter().any(|r| r.is_loading()) {
                return RenderOutcome::Suspended(self.suspend(observer, descriptors));
            }
        }
        RenderOutcome::Ready(results)
    }

    /// Build the pending awaitable that resolves the suspension.
    ///
    /// Fetches for every not-yet-settled position start immediately; the
    /// future resolves once all of them settle, after replaying each
    /// descriptor's callbacks exactly once, in position order.
    fn suspend(
        &self,
        observer: &QueriesObserver,
        descriptors: &[QueryOptions],
    ) -> BoxFuture<'static, ()> {
        // Keep the children mounted for exactly the aggregate's lifetime.
        let hold = observer.hold();
        let aggregate = observer.fetch_optimistic(descriptors);
        let boundary = self.boundary.clone();
        let descriptors = descriptors.to_vec();
        async move {
            let settlements = aggregate.await;
            let replayed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                replay_callbacks(&settlements, &descriptors, &boundary);
            }));
            if replayed.is_err() {
                // Must not take down the host; the per-query callbacks that
                // did run have already had their effect.
                tracing::error!("callback replay panicked during coordinated refetch");
            }
            hold.unsubscribe();
        }
        .boxed()
    }
}

fn replay_callbacks(
    settlements: &[Option<Settlement>],
    descriptors: &[QueryOptions],
    boundary: &ErrorResetBoundary,
) {
    for (settlement, descriptor) in settlements.iter().zip(descriptors) {
        match settlement {
            // Wasn't fetched; no callbacks to re-invoke.
            None => {}
            Some(Settlement::Fulfilled(result)) => {
                if let Some(data) = result.data.clone() {
                    if let Some(on_success) = &descriptor.on_success {
                        on_success(data.clone());
                    }
                    if let Some(on_settled) = &descriptor.on_settled {
                        on_settled(Some(data), None);
                    }
                }
            }
            Some(Settlement::Rejected(error)) => {
                boundary.clear_reset();
                if let Some(on_error) = &descriptor.on_error {
                    on_error(error.clone());
                }
                if let Some(on_settled) = &descriptor.on_settled {
                    on_settled(None, Some(error.clone()));
                }
            }
        }
    }
}
