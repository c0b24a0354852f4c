//! Per-upstream translation: URL building and response interpretation.
//!
//! An adapter owns everything specific to one upstream database: how to
//! express the normalized request as a subquery URL, which extractor paths
//! its responses use, and how raw records become unified ones. New
//! upstreams register by implementing [`UpstreamAdapter`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CompositeError, Result};
use crate::extid::Domain;
use crate::record::Record;
use crate::request::RequestContext;
use crate::subquery::Subquery;

pub mod neotoma;
pub mod pbdb;

pub use neotoma::NeotomaAdapter;
pub use pbdb::PbdbAdapter;

#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Human-readable upstream name, used to prefix warnings.
    fn label(&self) -> &'static str;

    fn domain(&self) -> Domain;

    /// JSON-pointer paths the streaming extractor watches in this
    /// upstream's responses.
    fn extractor_paths(&self) -> &'static [&'static str];

    /// Build the list-query URL. `Ok(None)` means this upstream has nothing
    /// matching the request and the subquery should abort silently.
    async fn build_list_url(&self, ctx: &RequestContext, sq: &Subquery) -> Result<Option<String>>;

    /// Build the single-record URL.
    async fn build_single_url(&self, ctx: &RequestContext, sq: &Subquery)
        -> Result<Option<String>>;

    /// Secondary taxon-name resolution endpoint. Only adapters that can
    /// translate their own identifiers to names implement this.
    async fn build_taxon_url(&self, ctx: &RequestContext, sq: &Subquery) -> Result<Option<String>> {
        let _ = (ctx, sq);
        Err(CompositeError::internal(format!(
            "{} has no taxon-name endpoint",
            self.label()
        )))
    }

    /// Classify one extractor emission: record, warning, or status.
    fn on_value(&self, ctx: &RequestContext, sq: &Subquery, path: &str, value: Value);
}

/// Append upstream diagnostics (a string or an array of strings) as
/// subquery warnings.
pub(crate) fn push_diagnostics(sq: &Subquery, value: &Value) {
    match value {
        Value::String(s) => sq.push_warning(s.clone()),
        Value::Array(items) => {
            for item in items {
                match item.as_str() {
                    Some(s) => sq.push_warning(s),
                    None => sq.push_warning(item.to_string()),
                }
            }
        }
        other => sq.push_warning(other.to_string()),
    }
}

/// Set the unified age fields: canonical ybp for filtering and ordering,
/// plus the client-requested unit for output.
pub(crate) fn set_age_fields(
    rec: &mut Record,
    ctx: &RequestContext,
    older_ybp: Option<f64>,
    younger_ybp: Option<f64>,
) {
    if let Some(older) = older_ybp {
        rec.set("age_older", older);
        rec.set("AgeOlder", ctx.age_unit.from_ybp(older));
    }
    if let Some(younger) = younger_ybp {
        rec.set("age_younger", younger);
        rec.set("AgeYounger", ctx.age_unit.from_ybp(younger));
    }
}

pub(crate) fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
