//! The composite driver: N subqueries under one deadline.
//!
//! Each subquery runs as a task that walks the state machine and releases
//! the completion barrier exactly once on its terminal transition. The
//! driver's periodic tick enforces the global deadline and drains the
//! retry queue, so queued retries re-init on the next tick instead of
//! recursing from the completion path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{CompositeError, Result};
use crate::http::{is_retryable, HttpSource, STATUS_READ_FAILED, STATUS_SEND_FAILED};
use crate::record::{sort_records, Record};
use crate::request::RequestContext;
use crate::subquery::{Subquery, SubqueryKind, SubqueryStatus};

/// Deadline check and retry drain cadence.
pub const TICK_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    /// Whole-composite deadline; zero disables it.
    pub timeout: Duration,
    /// Retry budget per subquery for transport failures.
    pub retries: u32,
}

#[derive(Debug, Default)]
struct BarrierInner {
    outstanding: i64,
    releases: u64,
    cancelled: Option<String>,
}

/// Counter that releases `run()` when every debit has been repaid or the
/// deadline cancels it.
pub(crate) struct Barrier {
    inner: Mutex<BarrierInner>,
    changed: watch::Sender<u64>,
}

impl Barrier {
    fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Mutex::new(BarrierInner::default()),
            changed,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BarrierInner> {
        self.inner.lock().expect("barrier poisoned")
    }

    fn debit(&self) {
        self.lock().outstanding += 1;
    }

    pub(crate) fn release(&self) {
        {
            let mut inner = self.lock();
            inner.outstanding -= 1;
            inner.releases += 1;
        }
        self.changed.send_modify(|g| *g += 1);
    }

    fn cancel(&self, reason: &str) {
        self.lock().cancelled = Some(reason.to_string());
        self.changed.send_modify(|g| *g += 1);
    }

    fn cancel_reason(&self) -> Option<String> {
        self.lock().cancelled.clone()
    }

    fn releases(&self) -> u64 {
        self.lock().releases
    }

    async fn wait(&self) {
        let mut rx = self.changed.subscribe();
        loop {
            {
                let inner = self.lock();
                if inner.outstanding <= 0 || inner.cancelled.is_some() {
                    return;
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct CompositeDriver {
    started: Instant,
    options: DriverOptions,
    ctx: Arc<RequestContext>,
    http: Arc<dyn HttpSource>,
    subqueries: Vec<Arc<Subquery>>,
    barrier: Arc<Barrier>,
    retry_queue: Arc<Mutex<Vec<usize>>>,
    timed_out: bool,
}

impl CompositeDriver {
    pub fn new(
        ctx: Arc<RequestContext>,
        http: Arc<dyn HttpSource>,
        options: DriverOptions,
    ) -> Self {
        let barrier = Arc::new(Barrier::new());
        // Founding debit, repaid once every subquery has been launched.
        barrier.debit();
        Self {
            started: Instant::now(),
            options,
            ctx,
            http,
            subqueries: Vec::new(),
            barrier,
            retry_queue: Arc::new(Mutex::new(Vec::new())),
            timed_out: false,
        }
    }

    pub fn add_subquery(&mut self, sq: Arc<Subquery>) {
        self.barrier.debit();
        self.subqueries.push(sq);
    }

    pub fn subqueries(&self) -> &[Arc<Subquery>] {
        &self.subqueries
    }

    /// Launch every subquery and wait for the barrier or the deadline.
    /// In-flight HTTP is torn down on return; whatever records the
    /// subqueries accumulated stay readable.
    pub async fn run(&mut self) -> Result<()> {
        let mut handles = Vec::with_capacity(self.subqueries.len());
        for sq in &self.subqueries {
            handles.push(tokio::spawn(subquery_task(
                self.ctx.clone(),
                self.http.clone(),
                sq.clone(),
                self.barrier.clone(),
                self.retry_queue.clone(),
                self.options.retries,
            )));
        }
        self.barrier.release();

        let barrier = self.barrier.clone();
        let mut tick = tokio::time::interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
        loop {
            tokio::select! {
                _ = barrier.wait() => break,
                _ = tick.tick() => self.on_tick(),
            }
        }
        self.timed_out = self.barrier.cancel_reason().is_some();
        if self.timed_out {
            warn!(elapsed = ?self.started.elapsed(), "composite deadline tripped");
        }
        for handle in handles {
            handle.abort();
        }

        for sq in &self.subqueries {
            if let Some(fatal) = sq.fatal() {
                return Err(CompositeError::internal(fatal));
            }
        }
        Ok(())
    }

    /// Deadline check first; otherwise wake every subquery queued for
    /// retry. The deadline check is skipped when no timeout is configured,
    /// but the tick still runs so retries are never stranded.
    fn on_tick(&self) {
        if self.options.timeout > Duration::ZERO && self.started.elapsed() > self.options.timeout {
            self.barrier.cancel("TIMEOUT");
            return;
        }
        let queued: Vec<usize> = {
            let mut queue = self.retry_queue.lock().expect("retry queue poisoned");
            queue.drain(..).collect()
        };
        for index in queued {
            if let Some(sq) = self.subqueries.get(index) {
                debug!(label = %sq.label, "releasing queued retry");
                sq.reinit.notify_one();
            }
        }
    }

    /// Records from `main` subqueries, concatenated in registration order
    /// then stably sorted by the requested keys.
    pub fn results(&self) -> Vec<Record> {
        let mut records = Vec::new();
        for sq in &self.subqueries {
            if sq.main {
                records.extend(sq.records());
            }
        }
        sort_records(&mut records, &self.ctx.order);
        records
    }

    pub fn removed(&self) -> u64 {
        self.subqueries
            .iter()
            .filter(|sq| sq.main)
            .map(|sq| sq.removed())
            .sum()
    }

    /// Synthesized warning list: the deadline, per-subquery non-2xx
    /// statuses, and adapter warnings prefixed with their subquery label.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.timed_out {
            out.push("TIMEOUT: the composite deadline was reached; results may be incomplete".into());
        }
        out.extend(self.ctx.warnings());
        for sq in &self.subqueries {
            if sq.status() == SubqueryStatus::Comp {
                if let Some(code) = sq.http_status() {
                    if !(200..300).contains(&code) {
                        out.push(format!(
                            "{}: request returned status {} ({})",
                            sq.label,
                            code,
                            sq.http_reason().unwrap_or_default()
                        ));
                    }
                }
            }
            for warning in sq.warnings() {
                out.push(format!("{}: {}", sq.label, warning));
            }
        }
        out
    }

    /// Subquery URLs in registration order; secondaries only when asked.
    pub fn urls(&self, include_secondary: bool) -> Vec<String> {
        self.subqueries
            .iter()
            .filter(|sq| sq.main || include_secondary)
            .filter_map(|sq| sq.url())
            .collect()
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Total barrier releases so far: 1 founding + one per terminal
    /// subquery transition.
    pub fn barrier_releases(&self) -> u64 {
        self.barrier.releases()
    }
}

/// One subquery's walk through the state machine.
async fn subquery_task(
    ctx: Arc<RequestContext>,
    http: Arc<dyn HttpSource>,
    sq: Arc<Subquery>,
    barrier: Arc<Barrier>,
    retry_queue: Arc<Mutex<Vec<usize>>>,
    retry_budget: u32,
) {
    loop {
        sq.set_status(SubqueryStatus::Init);
        let built = match sq.kind {
            SubqueryKind::List => sq.adapter.build_list_url(&ctx, &sq).await,
            SubqueryKind::Single => sq.adapter.build_single_url(&ctx, &sq).await,
            SubqueryKind::TaxonName => sq.adapter.build_taxon_url(&ctx, &sq).await,
        };
        let url = match built {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!(label = %sq.label, "no URL for this upstream; aborting subquery");
                sq.set_status(SubqueryStatus::Abort);
                break;
            }
            Err(e) => {
                error!(label = %sq.label, error = %e, "URL builder failed");
                sq.set_fatal(e.to_string());
                sq.set_status(SubqueryStatus::Abort);
                break;
            }
        };
        sq.set_url(url.clone());
        sq.set_status(SubqueryStatus::Get);
        debug!(label = %sq.label, url = %url, "issuing subquery");

        let mut reply = http.get(&url).await;
        sq.set_http(reply.status, reply.reason.clone());
        if let Err(e) = sq.consume(&ctx, &mut reply).await {
            debug!(label = %sq.label, error = %e.0, "body read failed");
            sq.set_http(STATUS_READ_FAILED, "body read failed");
        }
        sq.set_status(SubqueryStatus::Comp);

        let status = sq.http_status().unwrap_or(STATUS_SEND_FAILED);
        if is_retryable(status) {
            if sq.retries() < retry_budget {
                debug!(label = %sq.label, status, retry = sq.retries() + 1, "transport failure; queueing retry");
                sq.prepare_retry();
                retry_queue
                    .lock()
                    .expect("retry queue poisoned")
                    .push(sq.index);
                sq.reinit.notified().await;
                continue;
            }
            sq.push_warning(format!(
                "request failed with status {} after {} retries ({})",
                status,
                sq.retries(),
                url
            ));
        }
        break;
    }
    sq.signal_done();
    barrier.release();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn barrier_releases_balance_debits() {
        let barrier = Barrier::new();
        barrier.debit();
        barrier.debit();
        barrier.release();
        barrier.release();
        barrier.wait().await;
        assert_eq!(barrier.releases(), 2);
    }

    #[tokio::test]
    async fn cancelled_barrier_releases_waiters() {
        let barrier = Arc::new(Barrier::new());
        barrier.debit();
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        barrier.cancel("TIMEOUT");
        waiter.await.unwrap();
        assert_eq!(barrier.cancel_reason().as_deref(), Some("TIMEOUT"));
    }
}
