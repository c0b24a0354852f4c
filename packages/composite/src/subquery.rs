//! The per-upstream subquery: one outbound HTTP request and its state.
//!
//! Lifecycle: `CREATED → INIT → GET → COMP | ABORT`. A subquery whose URL
//! builder yields nothing aborts silently; a completed subquery always has
//! an HTTP status and reason, even for non-2xx responses, so adapters can
//! parse error bodies. Transport failures (synthetic statuses 595–597) are
//! retried with records and warnings reset; re-initialization is deferred
//! to the driver's next tick.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::{watch, Notify};

use crate::adapters::UpstreamAdapter;
use crate::http::{BodyError, BodyStream, HttpReply};
use crate::json_stream::{JsonExtractor, Utf8Chunker};
use crate::record::Record;
use crate::request::RequestContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubqueryStatus {
    #[default]
    Created,
    Init,
    Get,
    Comp,
    Abort,
}

/// Which URL the adapter builds for this subquery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryKind {
    List,
    Single,
    /// Secondary: resolve a taxon identifier to a name for another subquery.
    TaxonName,
}

#[derive(Debug, Default)]
pub struct SubqueryState {
    pub status: SubqueryStatus,
    pub url: Option<String>,
    pub records: Vec<Record>,
    pub warnings: Vec<String>,
    pub removed: u64,
    pub http_status: Option<u16>,
    pub http_reason: Option<String>,
    pub retries: u32,
    pub fatal: Option<String>,
}

pub struct Subquery {
    pub label: String,
    pub index: usize,
    pub main: bool,
    pub kind: SubqueryKind,
    pub adapter: Arc<dyn UpstreamAdapter>,
    pub depends_on: Option<Arc<Subquery>>,
    state: Mutex<SubqueryState>,
    done_tx: watch::Sender<bool>,
    /// Released by the driver's tick to re-run after a transient failure.
    pub(crate) reinit: Notify,
}

impl Subquery {
    pub fn new(
        label: impl Into<String>,
        index: usize,
        main: bool,
        kind: SubqueryKind,
        adapter: Arc<dyn UpstreamAdapter>,
        depends_on: Option<Arc<Subquery>>,
    ) -> Arc<Subquery> {
        let (done_tx, _) = watch::channel(false);
        Arc::new(Subquery {
            label: label.into(),
            index,
            main,
            kind,
            adapter,
            depends_on,
            state: Mutex::new(SubqueryState::default()),
            done_tx,
            reinit: Notify::new(),
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SubqueryState> {
        self.state.lock().expect("subquery state poisoned")
    }

    pub fn status(&self) -> SubqueryStatus {
        self.state().status
    }

    pub fn retries(&self) -> u32 {
        self.state().retries
    }

    pub fn http_status(&self) -> Option<u16> {
        self.state().http_status
    }

    pub fn http_reason(&self) -> Option<String> {
        self.state().http_reason.clone()
    }

    /// Programmer-error marker; the driver turns it into a 5xx.
    pub fn fatal(&self) -> Option<String> {
        self.state().fatal.clone()
    }

    pub(crate) fn set_fatal(&self, msg: impl Into<String>) {
        self.state().fatal = Some(msg.into());
    }

    pub fn url(&self) -> Option<String> {
        self.state().url.clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.state().records.clone()
    }

    pub fn removed(&self) -> u64 {
        self.state().removed
    }

    pub fn warnings(&self) -> Vec<String> {
        self.state().warnings.clone()
    }

    /// First accumulated record, used to read a secondary lookup's result.
    pub fn first_record(&self) -> Option<Record> {
        self.state().records.first().cloned()
    }

    pub(crate) fn set_status(&self, status: SubqueryStatus) {
        self.state().status = status;
    }

    pub(crate) fn set_url(&self, url: String) {
        self.state().url = Some(url);
    }

    pub(crate) fn set_http(&self, status: u16, reason: impl Into<String>) {
        let mut st = self.state();
        st.http_status = Some(status);
        st.http_reason = Some(reason.into());
    }

    pub fn push_record(&self, record: Record) {
        self.state().records.push(record);
    }

    pub fn push_warning(&self, warning: impl Into<String>) {
        self.state().warnings.push(warning.into());
    }

    pub fn count_removed(&self) {
        self.state().removed += 1;
    }

    /// Reset for another attempt. Records and warnings from the failed
    /// attempt are discarded so retries don't double-report.
    pub(crate) fn prepare_retry(&self) {
        let mut st = self.state();
        st.records.clear();
        st.warnings.clear();
        st.removed = 0;
        st.http_status = None;
        st.http_reason = None;
        st.retries += 1;
    }

    /// Mark terminal and wake any subquery waiting on this one.
    pub(crate) fn signal_done(&self) {
        let _ = self.done_tx.send(true);
    }

    /// Await this subquery's terminal transition (`COMP` or `ABORT`).
    pub async fn wait_done(&self) {
        let mut rx = self.done_tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stream the response body through the adapter's extractor. Parse
    /// errors become a warning and stop consumption; body read errors are
    /// reported to the caller for retry classification.
    pub(crate) async fn consume(
        &self,
        ctx: &RequestContext,
        reply: &mut HttpReply,
    ) -> std::result::Result<(), BodyError> {
        let mut extractor = JsonExtractor::new(self.adapter.extractor_paths());
        let mut chunker = Utf8Chunker::default();
        consume_stream(self, ctx, &mut reply.body, &mut extractor, &mut chunker).await
    }
}

async fn consume_stream(
    sq: &Subquery,
    ctx: &RequestContext,
    body: &mut BodyStream,
    extractor: &mut JsonExtractor,
    chunker: &mut Utf8Chunker,
) -> std::result::Result<(), BodyError> {
    while let Some(chunk) = body.next().await {
        let bytes = chunk?;
        let text = match chunker.push(&bytes) {
            Ok(text) => text,
            Err(e) => {
                sq.push_warning(format!("response parse error: {e}"));
                return Ok(());
            }
        };
        match extractor.feed(&text) {
            Ok(pairs) => {
                for (path, value) in pairs {
                    sq.adapter.on_value(ctx, sq, &path, value);
                }
            }
            Err(e) => {
                sq.push_warning(format!("response parse error: {e}"));
                return Ok(());
            }
        }
    }
    Ok(())
}

impl std::fmt::Debug for Subquery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subquery")
            .field("label", &self.label)
            .field("index", &self.index)
            .field("main", &self.main)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}
