//! PaleoBioDB adapter.
//!
//! The paleobiology upstream speaks Ma and understands every time rule
//! natively, so its subqueries never need client-side re-filtering. Records
//! arrive under `/records`, diagnostics under `/warnings` and `/errors`,
//! and the body carries its own `/status_code`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::age::AgeUnit;
use crate::error::Result;
use crate::extid::{Domain, ExternalId, IdType};
use crate::params::QueryString;
use crate::record::Record;
use crate::request::{IdParam, RequestContext};
use crate::subquery::{Subquery, SubqueryKind};

use super::{join_ids, push_diagnostics, set_age_fields, UpstreamAdapter};

const EXTRACTOR_PATHS: &[&str] = &["/records/^", "/warnings", "/errors", "/status_code"];

/// Raw-to-unified identifier field mapping.
const ID_FIELDS: &[(&str, &str, IdType)] = &[
    ("occurrence_no", "occ_id", IdType::Occ),
    ("collection_no", "col_id", IdType::Col),
    ("accepted_no", "taxon_id", IdType::Txn),
];

pub struct PbdbAdapter {
    base_url: String,
}

impl PbdbAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Push the age window in Ma along with the rule the upstream should
    /// apply. Returns whether anything was pushed.
    fn push_age_params(&self, ctx: &RequestContext, q: &mut QueryString) -> bool {
        let window = &ctx.window;
        if !window.is_bounded() {
            return false;
        }
        if let Some(max) = window.max_ybp {
            q.push("max_ma", &format!("{}", AgeUnit::Ma.from_ybp(max)));
        }
        if let Some(min) = window.min_ybp {
            q.push("min_ma", &format!("{}", AgeUnit::Ma.from_ybp(min)));
        }
        q.push("timerule", ctx.time_rule.as_str());
        if let Some(old) = window.old_buffer_ybp {
            q.push("timebuffer", &format!("{}", AgeUnit::Ma.from_ybp(old)));
        }
        if let Some(young) = window.young_buffer_ybp {
            q.push("latebuffer", &format!("{}", AgeUnit::Ma.from_ybp(young)));
        }
        true
    }

    fn push_common_tail(&self, ctx: &RequestContext, q: &mut QueryString) {
        if !ctx.show.is_empty() {
            q.push("show", &ctx.show.join(","));
        }
        for (key, value) in &ctx.passthru {
            q.push(key, value);
        }
        // Pin upstream field names independent of the client's vocabulary.
        q.push("vocab", "pbdb");
    }

    fn normalize(&self, ctx: &RequestContext, rec: &mut Record) {
        rec.set("database", Domain::Paleo.label());
        rec.set("record_type", ctx.vocab.record_type());
        for (raw, unified, id_type) in ID_FIELDS {
            if let Some(num) = rec.get_u64(raw) {
                rec.remove(raw);
                rec.set(unified, ExternalId::format(Domain::Paleo, *id_type, num));
            }
        }
        rec.rename("accepted_name", "taxon_name");
        let older = rec.get_f64("max_ma").map(|v| AgeUnit::Ma.to_ybp(v));
        let younger = rec.get_f64("min_ma").map(|v| AgeUnit::Ma.to_ybp(v));
        rec.remove("max_ma");
        rec.remove("min_ma");
        set_age_fields(rec, ctx, older, younger);
        for key in ["lng", "lat"] {
            if let Some(v) = rec.get_f64(key) {
                rec.set(key, v);
            }
        }
    }
}

#[async_trait]
impl UpstreamAdapter for PbdbAdapter {
    fn label(&self) -> &'static str {
        "PaleoBioDB"
    }

    fn domain(&self) -> Domain {
        Domain::Paleo
    }

    fn extractor_paths(&self) -> &'static [&'static str] {
        EXTRACTOR_PATHS
    }

    async fn build_list_url(&self, ctx: &RequestContext, _sq: &Subquery) -> Result<Option<String>> {
        let mut q = QueryString::new();
        let mut selective = false;

        if let Some(ids) = ctx.ids_for(IdParam::Occ, Domain::Paleo, IdType::Occ) {
            if ids.is_empty() {
                return Ok(None);
            }
            q.push("occ_id", &join_ids(&ids));
            selective = true;
        }
        if let Some(ids) = ctx.ids_for(IdParam::Site, Domain::Paleo, IdType::Col) {
            if ids.is_empty() {
                return Ok(None);
            }
            q.push("coll_id", &join_ids(&ids));
            selective = true;
        }

        if let Some(name) = &ctx.taxon_name {
            q.push("taxon_name", name);
            selective = true;
        } else if let Some(name) = &ctx.base_name {
            q.push("base_name", name);
            selective = true;
        } else if let Some(name) = &ctx.match_name {
            q.push("match_name", name);
            selective = true;
        } else {
            for (param, upstream_name) in [(IdParam::Base, "base_id"), (IdParam::Taxon, "taxon_id")]
            {
                if let Some(ids) = ctx.ids_for(param, Domain::Paleo, IdType::Txn) {
                    if ids.is_empty() {
                        return Ok(None);
                    }
                    q.push(upstream_name, &join_ids(&ids));
                    selective = true;
                }
            }
        }

        if let Some(bbox) = &ctx.bbox {
            q.push("lngmin", &format!("{}", bbox.west));
            q.push("lngmax", &format!("{}", bbox.east));
            q.push("latmin", &format!("{}", bbox.south));
            q.push("latmax", &format!("{}", bbox.north));
            selective = true;
        }
        if self.push_age_params(ctx, &mut q) {
            selective = true;
        }
        if !selective {
            return Ok(None);
        }
        self.push_common_tail(ctx, &mut q);
        Ok(Some(q.append_to(&self.endpoint("occs/list.json"))))
    }

    async fn build_single_url(
        &self,
        ctx: &RequestContext,
        _sq: &Subquery,
    ) -> Result<Option<String>> {
        let ids = match ctx.ids_for(IdParam::Occ, Domain::Paleo, IdType::Occ) {
            Some(ids) if !ids.is_empty() => ids,
            _ => return Ok(None),
        };
        let mut q = QueryString::new();
        q.push("id", &ids[0].to_string());
        self.push_common_tail(ctx, &mut q);
        Ok(Some(q.append_to(&self.endpoint("occs/single.json"))))
    }

    async fn build_taxon_url(&self, ctx: &RequestContext, _sq: &Subquery) -> Result<Option<String>> {
        let Some(taxon) = ctx.paleo_taxon_id() else {
            return Ok(None);
        };
        let mut q = QueryString::new();
        q.push("taxon_id", &taxon.to_string());
        q.push("vocab", "pbdb");
        Ok(Some(q.append_to(&self.endpoint("taxa/list.json"))))
    }

    fn on_value(&self, ctx: &RequestContext, sq: &Subquery, path: &str, value: Value) {
        match path {
            "/records/^" => {
                let Some(mut rec) = Record::from_object(value) else {
                    sq.push_warning("non-object record in response");
                    return;
                };
                if sq.kind == SubqueryKind::TaxonName {
                    sq.push_record(rec);
                    return;
                }
                self.normalize(ctx, &mut rec);
                sq.push_record(rec);
            }
            "/status_code" => {
                if let Some(code) = value.as_u64() {
                    if code != 200 {
                        sq.push_warning(format!("Request failed with status {}", code));
                    }
                }
            }
            "/warnings" | "/errors" => push_diagnostics(sq, &value),
            other => debug!(path = other, "unhandled extractor path"),
        }
    }
}
