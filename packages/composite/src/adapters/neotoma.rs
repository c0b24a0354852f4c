//! Neotoma adapter.
//!
//! The Quaternary upstream speaks years before present and only knows a
//! binary contain/overlap switch, so `major` and `buffer` windows are sent
//! as a coarse overlap and re-filtered here after normalization. Records
//! arrive under `/data` with nested `sample`/`site`/`age` objects; the
//! response carries `/success` and `/message`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::age::TimeRule;
use crate::error::Result;
use crate::extid::{Domain, ExternalId, IdType};
use crate::params::QueryString;
use crate::record::Record;
use crate::request::{IdParam, RequestContext};
use crate::subquery::Subquery;

use super::{join_ids, push_diagnostics, set_age_fields, UpstreamAdapter};

const EXTRACTOR_PATHS: &[&str] = &["/data/^", "/success", "/message"];

/// The upstream's default row cap is bypassed because filtering happens on
/// this side of the wire.
const UNCAPPED_LIMIT: &str = "999999";

pub struct NeotomaAdapter {
    base_url: String,
}

impl NeotomaAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn push_age_params(&self, ctx: &RequestContext, q: &mut QueryString) -> bool {
        let window = &ctx.window;
        if !window.is_bounded() {
            return false;
        }
        if let Some(max) = window.max_ybp {
            q.push("ageold", &format!("{}", max));
        }
        if let Some(min) = window.min_ybp {
            q.push("ageyoung", &format!("{}", min));
        }
        let contain = if ctx.time_rule == TimeRule::Contain {
            "1"
        } else {
            "0"
        };
        q.push("agedocontain", contain);
        true
    }

    /// Taxon selection: an explicit name wins, then native Quaternary taxon
    /// ids, then a name resolved by the secondary lookup. Returns false if
    /// a taxon selector was requested but nothing is usable here.
    async fn push_taxon_params(
        &self,
        ctx: &RequestContext,
        sq: &Subquery,
        q: &mut QueryString,
    ) -> Option<bool> {
        if let Some(name) = ctx.any_name() {
            q.push("taxonname", name);
            return Some(true);
        }
        let base = ctx.ids_for(IdParam::Base, Domain::Quaternary, IdType::Txn);
        let taxa = ctx.ids_for(IdParam::Taxon, Domain::Quaternary, IdType::Txn);
        let native: Vec<u64> = base
            .iter()
            .flatten()
            .chain(taxa.iter().flatten())
            .copied()
            .collect();
        if !native.is_empty() {
            q.push("taxonids", &join_ids(&native));
            return Some(true);
        }
        if let Some(secondary) = &sq.depends_on {
            secondary.wait_done().await;
            match resolved_name(secondary) {
                Some(name) => {
                    q.push("taxonname", &name);
                    return Some(true);
                }
                None => {
                    sq.push_warning(
                        "taxon name resolution against PaleoBioDB failed; nothing to query",
                    );
                    return None;
                }
            }
        }
        if base.is_some() || taxa.is_some() {
            // Taxon ids were named but none belong to this upstream.
            return None;
        }
        Some(false)
    }

    fn normalize(&self, ctx: &RequestContext, rec: &mut Record) {
        rec.set("database", Domain::Quaternary.label());
        rec.set("record_type", ctx.vocab.record_type());
        if let Some(num) = rec.get_u64("occid") {
            rec.remove("occid");
            rec.set(
                "occ_id",
                ExternalId::format(Domain::Quaternary, IdType::Occ, num),
            );
        }
        if let Some(sample) = take_object(rec, "sample") {
            if let Some(num) = sample.get_u64("taxonid") {
                rec.set(
                    "taxon_id",
                    ExternalId::format(Domain::Quaternary, IdType::Txn, num),
                );
            }
            if let Some(name) = sample.get_str("taxonname") {
                rec.set("taxon_name", name);
            }
        }
        if let Some(site) = take_object(rec, "site") {
            if let Some(num) = site.get_u64("siteid") {
                rec.set(
                    "site_id",
                    ExternalId::format(Domain::Quaternary, IdType::Sit, num),
                );
            }
            if let Some(name) = site.get_str("sitename") {
                rec.set("site_name", name);
            }
            if let Some(num) = site.get_u64("datasetid") {
                rec.set(
                    "dataset_id",
                    ExternalId::format(Domain::Quaternary, IdType::Dst, num),
                );
            }
            set_coordinates(rec, &site);
        }
        if let Some(age) = take_object(rec, "age") {
            let older = age.get_f64("ageolder").or_else(|| age.get_f64("age"));
            let younger = age.get_f64("ageyounger").or_else(|| age.get_f64("age"));
            set_age_fields(rec, ctx, older, younger);
        }
    }
}

/// The site gives either a point or a bounding rectangle; rectangles
/// collapse to their midpoint.
fn set_coordinates(rec: &mut Record, site: &Record) {
    let lng = match (site.get_f64("longwest"), site.get_f64("longeast")) {
        (Some(w), Some(e)) => Some((w + e) / 2.0),
        _ => site.get_f64("lng"),
    };
    let lat = match (site.get_f64("latsouth"), site.get_f64("latnorth")) {
        (Some(s), Some(n)) => Some((s + n) / 2.0),
        _ => site.get_f64("lat"),
    };
    if let Some(lng) = lng {
        rec.set("lng", lng);
    }
    if let Some(lat) = lat {
        rec.set("lat", lat);
    }
}

fn take_object(rec: &mut Record, key: &str) -> Option<Record> {
    rec.remove(key).and_then(Record::from_object)
}

/// Read the taxon name out of a completed secondary lookup.
fn resolved_name(secondary: &Subquery) -> Option<String> {
    let rec = secondary.first_record()?;
    rec.get_str("taxon_name")
        .or_else(|| rec.get_str("nam"))
        .map(str::to_string)
}

#[async_trait]
impl UpstreamAdapter for NeotomaAdapter {
    fn label(&self) -> &'static str {
        "Neotoma"
    }

    fn domain(&self) -> Domain {
        Domain::Quaternary
    }

    fn extractor_paths(&self) -> &'static [&'static str] {
        EXTRACTOR_PATHS
    }

    async fn build_list_url(&self, ctx: &RequestContext, sq: &Subquery) -> Result<Option<String>> {
        let mut q = QueryString::new();
        let mut selective = false;

        if let Some(ids) = ctx.ids_for(IdParam::Occ, Domain::Quaternary, IdType::Occ) {
            if ids.is_empty() {
                return Ok(None);
            }
            q.push("occid", &join_ids(&ids));
            selective = true;
        }
        if let Some(ids) = ctx.ids_for(IdParam::Site, Domain::Quaternary, IdType::Sit) {
            if ids.is_empty() {
                return Ok(None);
            }
            q.push("siteid", &join_ids(&ids));
            selective = true;
        }
        match self.push_taxon_params(ctx, sq, &mut q).await {
            Some(pushed) => selective |= pushed,
            None => return Ok(None),
        }
        if let Some(bbox) = &ctx.bbox {
            q.push(
                "loc",
                &format!("{},{},{},{}", bbox.west, bbox.south, bbox.east, bbox.north),
            );
            selective = true;
        }
        if self.push_age_params(ctx, &mut q) {
            selective = true;
        }
        if !selective {
            return Ok(None);
        }
        q.push("limit", UNCAPPED_LIMIT);
        Ok(Some(q.append_to(&self.endpoint("data/occurrences"))))
    }

    async fn build_single_url(
        &self,
        ctx: &RequestContext,
        _sq: &Subquery,
    ) -> Result<Option<String>> {
        let ids = match ctx.ids_for(IdParam::Occ, Domain::Quaternary, IdType::Occ) {
            Some(ids) if !ids.is_empty() => ids,
            _ => return Ok(None),
        };
        let mut q = QueryString::new();
        q.push("occid", &ids[0].to_string());
        Ok(Some(q.append_to(&self.endpoint("data/occurrences"))))
    }

    fn on_value(&self, ctx: &RequestContext, sq: &Subquery, path: &str, value: Value) {
        match path {
            "/data/^" => {
                let Some(mut rec) = Record::from_object(value) else {
                    sq.push_warning("non-object record in response");
                    return;
                };
                self.normalize(ctx, &mut rec);
                if ctx
                    .window
                    .passes(ctx.time_rule, rec.age_older(), rec.age_younger())
                {
                    sq.push_record(rec);
                } else {
                    sq.count_removed();
                }
            }
            "/success" => {
                let failed = matches!(value, Value::Bool(false) | Value::Null)
                    || value.as_u64() == Some(0);
                if failed {
                    sq.push_warning("Request failed");
                }
            }
            "/message" => push_diagnostics(sq, &value),
            other => debug!(path = other, "unhandled extractor path"),
        }
    }
}
