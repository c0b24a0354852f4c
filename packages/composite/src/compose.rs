//! Composite assembly: one gateway call = one driver run.
//!
//! The gateway turns a parsed request into subqueries, wiring the
//! cross-database secondary lookup when the Quaternary upstream needs a
//! taxon name it can only get from PaleoBioDB.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::adapters::{NeotomaAdapter, PbdbAdapter, UpstreamAdapter};
use crate::driver::{CompositeDriver, DriverOptions};
use crate::error::{CompositeError, Result};
use crate::extid::Domain;
use crate::http::HttpSource;
use crate::record::Record;
use crate::request::RequestContext;
use crate::subquery::{Subquery, SubqueryKind};

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub pbdb_base_url: String,
    pub neotoma_base_url: String,
    /// Whole-composite deadline; zero disables it.
    pub timeout: Duration,
    /// Transport-failure retry budget per subquery.
    pub retries: u32,
}

/// Everything a formatted response needs from one composite run.
#[derive(Debug)]
pub struct CompositeOutcome {
    pub records: Vec<Record>,
    pub warnings: Vec<String>,
    pub removed: u64,
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Primary subquery URLs, in registration order.
    pub urls: Vec<String>,
    /// Every subquery URL, secondaries included.
    pub all_urls: Vec<String>,
}

pub struct Gateway {
    http: Arc<dyn HttpSource>,
    pbdb: Arc<PbdbAdapter>,
    neotoma: Arc<NeotomaAdapter>,
    timeout: Duration,
    retries: u32,
}

impl Gateway {
    pub fn new(http: Arc<dyn HttpSource>, options: GatewayOptions) -> Self {
        Self {
            http,
            pbdb: Arc::new(PbdbAdapter::new(options.pbdb_base_url)),
            neotoma: Arc::new(NeotomaAdapter::new(options.neotoma_base_url)),
            timeout: options.timeout,
            retries: options.retries,
        }
    }

    pub async fn occurrence_list(&self, ctx: RequestContext) -> Result<CompositeOutcome> {
        self.execute(ctx, SubqueryKind::List).await
    }

    pub async fn occurrence_single(&self, ctx: RequestContext) -> Result<CompositeOutcome> {
        if ctx.occ_ids.is_none() {
            return Err(CompositeError::bad_request(
                "single-record fetch requires occ_id",
            ));
        }
        self.execute(ctx, SubqueryKind::Single).await
    }

    async fn execute(&self, ctx: RequestContext, kind: SubqueryKind) -> Result<CompositeOutcome> {
        let ctx = Arc::new(ctx);
        let mut driver = CompositeDriver::new(
            ctx.clone(),
            self.http.clone(),
            DriverOptions {
                timeout: self.timeout,
                retries: self.retries,
            },
        );

        let mut index = 0;
        for domain in ctx.enabled.clone() {
            match domain {
                Domain::Paleo => {
                    let label = format!("{}#{}", self.pbdb.label(), index + 1);
                    driver.add_subquery(Subquery::new(
                        label,
                        index,
                        true,
                        kind,
                        self.pbdb.clone(),
                        None,
                    ));
                    index += 1;
                }
                Domain::Quaternary => {
                    let secondary = if kind == SubqueryKind::List && ctx.needs_name_resolution() {
                        let label = format!("{}#{}", self.pbdb.label(), index + 1);
                        let sec = Subquery::new(
                            label,
                            index,
                            false,
                            SubqueryKind::TaxonName,
                            self.pbdb.clone(),
                            None,
                        );
                        driver.add_subquery(sec.clone());
                        index += 1;
                        Some(sec)
                    } else {
                        None
                    };
                    let label = format!("{}#{}", self.neotoma.label(), index + 1);
                    driver.add_subquery(Subquery::new(
                        label,
                        index,
                        true,
                        kind,
                        self.neotoma.clone(),
                        secondary,
                    ));
                    index += 1;
                }
            }
        }

        driver.run().await?;

        let outcome = CompositeOutcome {
            records: driver.results(),
            warnings: driver.warnings(),
            removed: driver.removed(),
            elapsed: driver.elapsed(),
            timed_out: driver.timed_out(),
            urls: driver.urls(false),
            all_urls: driver.urls(true),
        };
        info!(
            records = outcome.records.len(),
            removed = outcome.removed,
            warnings = outcome.warnings.len(),
            timed_out = outcome.timed_out,
            elapsed = ?outcome.elapsed,
            "composite request complete"
        );
        Ok(outcome)
    }
}
