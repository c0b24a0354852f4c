//! Composite request parsing and canonicalization.
//!
//! `RequestContext::from_params` turns the raw query-string map into an
//! immutable-after-parse bundle: ages in canonical ybp, identifier lists
//! parsed and domain-resolved, the time rule settled, ordering keys checked.
//! Caller mistakes fail here with `BadRequest`; identifier classification
//! problems become warnings and the identifier is dropped.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::age::{AgeUnit, AgeWindow, TimeRule};
use crate::error::{CompositeError, Result};
use crate::extid::{Domain, ExternalId, IdType};

/// Field-name scheme for the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vocab {
    Neotoma,
    Pbdb,
    Com,
    Dwc,
}

impl Vocab {
    pub fn parse(s: &str) -> Option<Vocab> {
        match s.to_ascii_lowercase().as_str() {
            "neotoma" => Some(Vocab::Neotoma),
            "pbdb" => Some(Vocab::Pbdb),
            "com" => Some(Vocab::Com),
            "dwc" => Some(Vocab::Dwc),
            _ => None,
        }
    }

    /// The `record_type` value an occurrence record renders as.
    pub fn record_type(self) -> &'static str {
        match self {
            Vocab::Pbdb => "occ",
            Vocab::Neotoma | Vocab::Dwc => "Occurrence",
            Vocab::Com => "occurrence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKey {
    AgeOlder,
    AgeYounger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderSpec {
    pub key: OrderKey,
    pub descending: bool,
}

impl OrderSpec {
    fn parse(s: &str) -> Option<OrderSpec> {
        let (key_part, dir_part) = match s.split_once('.') {
            Some((k, d)) => (k, Some(d)),
            None => (s, None),
        };
        let key = match key_part.to_ascii_lowercase().as_str() {
            "ageolder" => OrderKey::AgeOlder,
            "ageyounger" => OrderKey::AgeYounger,
            _ => return None,
        };
        let descending = match dir_part {
            None => false,
            Some(d) => match d.to_ascii_lowercase().as_str() {
                "asc" => false,
                "desc" => true,
                _ => return None,
            },
        };
        Some(OrderSpec { key, descending })
    }
}

/// `bbox=W,S,E,N` in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bbox {
    fn parse(s: &str) -> Result<Bbox> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(CompositeError::bad_request(format!(
                "bbox must be 'W,S,E,N': '{}'",
                s
            )));
        }
        let mut coords = [0.0f64; 4];
        for (i, p) in parts.iter().enumerate() {
            coords[i] = p.trim().parse().map_err(|_| {
                CompositeError::bad_request(format!("bbox coordinate '{}' is not a number", p))
            })?;
        }
        let bbox = Bbox {
            west: coords[0],
            south: coords[1],
            east: coords[2],
            north: coords[3],
        };
        if bbox.west >= bbox.east || bbox.south >= bbox.north {
            return Err(CompositeError::bad_request(
                "bbox edges must satisfy W < E and S < N",
            ));
        }
        Ok(bbox)
    }
}

/// Which identifier parameter an adapter is asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdParam {
    Occ,
    Site,
    Taxon,
    Base,
}

impl IdParam {
    fn name(self) -> &'static str {
        match self {
            IdParam::Occ => "occ_id",
            IdParam::Site => "site_id",
            IdParam::Taxon => "taxon_id",
            IdParam::Base => "base_id",
        }
    }

    fn allowed_types(self) -> &'static [IdType] {
        match self {
            IdParam::Occ => &[IdType::Occ],
            IdParam::Site => &[IdType::Sit, IdType::Col],
            IdParam::Taxon | IdParam::Base => &[IdType::Txn],
        }
    }
}

const KNOWN_PARAMS: &[&str] = &[
    "occ_id", "site_id", "taxon_name", "base_name", "match_name", "base_id", "taxon_id", "bbox",
    "min_age", "max_age", "min_ma", "max_ma", "timerule", "timebuffer", "ds", "ageunit", "order",
    "vocab", "show", "limit", "offset", "count",
];

/// PaleoBioDB output blocks we forward through `show`.
const KNOWN_SHOW: &[&str] = &[
    "full", "class", "coords", "loc", "paleoloc", "attr", "time", "strat", "lith", "env", "ref",
    "crmod",
];

/// Immutable-after-parse composite request bundle.
#[derive(Debug)]
pub struct RequestContext {
    pub vocab: Vocab,
    pub age_unit: AgeUnit,
    pub time_rule: TimeRule,
    pub window: AgeWindow,
    pub bbox: Option<Bbox>,
    pub occ_ids: Option<Vec<ExternalId>>,
    pub site_ids: Option<Vec<ExternalId>>,
    pub taxon_ids: Option<Vec<ExternalId>>,
    pub base_ids: Option<Vec<ExternalId>>,
    pub taxon_name: Option<String>,
    pub base_name: Option<String>,
    pub match_name: Option<String>,
    pub enabled: Vec<Domain>,
    pub order: Vec<OrderSpec>,
    pub show: Vec<String>,
    pub passthru: BTreeMap<String, String>,
    warnings: Mutex<Vec<String>>,
}

impl RequestContext {
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<RequestContext> {
        let mut warnings = Vec::new();
        for key in params.keys() {
            if !KNOWN_PARAMS.contains(&key.as_str()) {
                warnings.push(format!("unknown parameter '{}' was ignored", key));
            }
        }

        let enabled = parse_ds(params.get("ds"))?;

        let vocab = match params.get("vocab") {
            Some(v) => Vocab::parse(v).ok_or_else(|| {
                CompositeError::bad_request(format!("unknown vocabulary '{}'", v))
            })?,
            None => Vocab::Com,
        };

        let age_unit = match params.get("ageunit") {
            Some(v) => AgeUnit::parse(v)
                .ok_or_else(|| CompositeError::bad_request(format!("unknown ageunit '{}'", v)))?,
            None => AgeUnit::Ma,
        };

        let min_ybp = parse_age_bound(params, "min_age", "min_ma", age_unit)?;
        let max_ybp = parse_age_bound(params, "max_age", "max_ma", age_unit)?;
        if let (Some(min), Some(max)) = (min_ybp, max_ybp) {
            if min > max {
                return Err(CompositeError::bad_request(
                    "minimum age is older than maximum age",
                ));
            }
        }
        let mut window = AgeWindow {
            min_ybp,
            max_ybp,
            ..Default::default()
        };

        let explicit_rule = match params.get("timerule") {
            Some(v) => Some(TimeRule::parse(v).ok_or_else(|| {
                CompositeError::bad_request(format!("unknown timerule '{}'", v))
            })?),
            None => None,
        };
        let time_rule = match params.get("timebuffer") {
            Some(spec) => {
                if matches!(explicit_rule, Some(rule) if rule != TimeRule::Buffer) {
                    return Err(CompositeError::bad_request(
                        "timebuffer conflicts with the requested timerule",
                    ));
                }
                let (old, young) = parse_timebuffer(spec, window.range_ybp(), age_unit)?;
                window.old_buffer_ybp = Some(old);
                window.young_buffer_ybp = Some(young.unwrap_or(old));
                TimeRule::Buffer
            }
            None => explicit_rule.unwrap_or_default(),
        };

        let bbox = params.get("bbox").map(|s| Bbox::parse(s)).transpose()?;

        let occ_ids = parse_id_list(params.get("occ_id"), IdParam::Occ, &enabled, &mut warnings)?;
        let site_ids = parse_id_list(params.get("site_id"), IdParam::Site, &enabled, &mut warnings)?;
        let taxon_ids =
            parse_id_list(params.get("taxon_id"), IdParam::Taxon, &enabled, &mut warnings)?;
        let base_ids = parse_id_list(params.get("base_id"), IdParam::Base, &enabled, &mut warnings)?;

        let taxon_name = params.get("taxon_name").cloned();
        let base_name = params.get("base_name").cloned();
        let match_name = params.get("match_name").cloned();
        let name_count = [&taxon_name, &base_name, &match_name]
            .iter()
            .filter(|n| n.is_some())
            .count();
        if name_count > 1 {
            return Err(CompositeError::bad_request(
                "at most one of taxon_name, base_name, match_name may be given",
            ));
        }

        let has_selector = occ_ids.is_some()
            || site_ids.is_some()
            || taxon_ids.is_some()
            || base_ids.is_some()
            || name_count == 1
            || bbox.is_some()
            || window.is_bounded();
        if !has_selector {
            return Err(CompositeError::bad_request(
                "at least one selector parameter is required (identifier, name, bbox or age bound)",
            ));
        }

        let order = match params.get("order") {
            Some(spec) => spec
                .split(',')
                .map(|part| {
                    OrderSpec::parse(part.trim()).ok_or_else(|| {
                        CompositeError::bad_request(format!("unknown order key '{}'", part))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let mut show = Vec::new();
        if let Some(spec) = params.get("show") {
            for block in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if KNOWN_SHOW.contains(&block) {
                    show.push(block.to_string());
                } else {
                    warnings.push(format!("unknown output block '{}' was ignored", block));
                }
            }
        }

        let mut passthru = BTreeMap::new();
        for key in ["limit", "offset", "count"] {
            if let Some(v) = params.get(key) {
                if key != "count" && v.parse::<u64>().is_err() {
                    return Err(CompositeError::bad_request(format!(
                        "parameter '{}' must be a non-negative integer",
                        key
                    )));
                }
                passthru.insert(key.to_string(), v.clone());
            }
        }

        Ok(RequestContext {
            vocab,
            age_unit,
            time_rule,
            window,
            bbox,
            occ_ids,
            site_ids,
            taxon_ids,
            base_ids,
            taxon_name,
            base_name,
            match_name,
            enabled,
            order,
            show,
            passthru,
            warnings: Mutex::new(warnings),
        })
    }

    pub fn add_warning(&self, msg: impl Into<String>) {
        self.warnings.lock().expect("warning list poisoned").push(msg.into());
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().expect("warning list poisoned").clone()
    }

    pub fn is_enabled(&self, domain: Domain) -> bool {
        self.enabled.contains(&domain)
    }

    /// The requested name selector, if any, regardless of which of the three
    /// parameters carried it.
    pub fn any_name(&self) -> Option<&str> {
        self.taxon_name
            .as_deref()
            .or(self.base_name.as_deref())
            .or(self.match_name.as_deref())
    }

    /// Identifier numbers for `param` belonging to `domain`, with `expected`
    /// the type tag this upstream uses for the parameter. Returns None when
    /// the client did not supply the parameter at all; a Some of an empty
    /// list means "supplied, but nothing for this upstream".
    pub fn ids_for(&self, param: IdParam, domain: Domain, expected: IdType) -> Option<Vec<u64>> {
        let list = match param {
            IdParam::Occ => &self.occ_ids,
            IdParam::Site => &self.site_ids,
            IdParam::Taxon => &self.taxon_ids,
            IdParam::Base => &self.base_ids,
        };
        let list = list.as_ref()?;
        let mut nums = Vec::new();
        for id in list {
            if id.domain != Some(domain) {
                continue;
            }
            match id.id_type {
                Some(t) if t != expected => self.add_warning(format!(
                    "identifier '{}' has the wrong type for {} parameter '{}'",
                    id,
                    domain.label(),
                    param.name()
                )),
                _ => nums.push(id.num),
            }
        }
        Some(nums)
    }

    /// First paleo-domain taxon identifier (`base_id` preferred), used for
    /// cross-database name resolution.
    pub fn paleo_taxon_id(&self) -> Option<u64> {
        for list in [&self.base_ids, &self.taxon_ids] {
            if let Some(ids) = list {
                if let Some(id) = ids.iter().find(|id| id.domain == Some(Domain::Paleo)) {
                    return Some(id.num);
                }
            }
        }
        None
    }

    /// True when the Quaternary upstream needs a taxon name it does not
    /// have: a paleo-domain taxon id was given and no name selector.
    pub fn needs_name_resolution(&self) -> bool {
        self.any_name().is_none() && self.paleo_taxon_id().is_some()
    }
}

fn parse_ds(spec: Option<&String>) -> Result<Vec<Domain>> {
    let Some(spec) = spec else {
        return Ok(vec![Domain::Paleo, Domain::Quaternary]);
    };
    let mut enabled = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let domain = Domain::from_alias(part).ok_or_else(|| {
            CompositeError::bad_request(format!("unknown data service '{}' in 'ds'", part))
        })?;
        if !enabled.contains(&domain) {
            enabled.push(domain);
        }
    }
    if enabled.is_empty() {
        return Err(CompositeError::bad_request("'ds' selects no data service"));
    }
    Ok(enabled)
}

/// One of `<name>_age` (request unit) or `<name>_ma`, never both.
fn parse_age_bound(
    params: &BTreeMap<String, String>,
    age_key: &str,
    ma_key: &str,
    unit: AgeUnit,
) -> Result<Option<f64>> {
    let age = params.get(age_key);
    let ma = params.get(ma_key);
    if age.is_some() && ma.is_some() {
        return Err(CompositeError::bad_request(format!(
            "at most one of {} and {} may be given",
            age_key, ma_key
        )));
    }
    let (raw, to_ybp): (&String, fn(AgeUnit, f64) -> f64) = match (age, ma) {
        (Some(v), None) => (v, AgeUnit::to_ybp),
        (None, Some(v)) => (v, |_, v| AgeUnit::Ma.to_ybp(v)),
        (None, None) => return Ok(None),
        _ => unreachable!(),
    };
    let value: f64 = raw.trim().parse().map_err(|_| {
        CompositeError::bad_request(format!("age bound '{}' is not a number", raw))
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(CompositeError::bad_request(format!(
            "age bound '{}' must be a non-negative number",
            raw
        )));
    }
    Ok(Some(to_ybp(unit, value)))
}

/// `timebuffer=old[,young]`, each absolute in the request unit or a
/// percentage of the window range with a `%` suffix.
fn parse_timebuffer(
    spec: &str,
    range_ybp: Option<f64>,
    unit: AgeUnit,
) -> Result<(f64, Option<f64>)> {
    let mut parts = spec.splitn(2, ',');
    let old = parse_buffer_value(parts.next().unwrap_or(""), range_ybp, unit)?;
    let young = match parts.next() {
        Some(p) => Some(parse_buffer_value(p, range_ybp, unit)?),
        None => None,
    };
    Ok((old, young))
}

fn parse_buffer_value(raw: &str, range_ybp: Option<f64>, unit: AgeUnit) -> Result<f64> {
    let raw = raw.trim();
    let (number, pct) = match raw.strip_suffix('%') {
        Some(prefix) => (prefix, true),
        None => (raw, false),
    };
    let value: f64 = number.trim().parse().map_err(|_| {
        CompositeError::bad_request(format!("timebuffer value '{}' is not a number", raw))
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(CompositeError::bad_request(format!(
            "timebuffer value '{}' must be non-negative",
            raw
        )));
    }
    if pct {
        let range = range_ybp.ok_or_else(|| {
            CompositeError::bad_request("percentage timebuffer requires a maximum age bound")
        })?;
        Ok(value / 100.0 * range)
    } else {
        Ok(unit.to_ybp(value))
    }
}

/// Parse, domain-resolve and type-screen one identifier list. Unknown
/// domains are caller errors; ambiguous or mistyped identifiers degrade to
/// warnings and are dropped.
fn parse_id_list(
    raw: Option<&String>,
    param: IdParam,
    enabled: &[Domain],
    warnings: &mut Vec<String>,
) -> Result<Option<Vec<ExternalId>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let single = if enabled.len() == 1 {
        Some(enabled[0])
    } else {
        None
    };
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut id = ExternalId::parse(part)
            .map_err(|e| CompositeError::bad_request(e.to_string()))?;
        if id.domain.is_none() {
            match single {
                Some(domain) => id.domain = Some(domain),
                None => {
                    warnings.push(format!(
                        "identifier '{}' in '{}' has no domain prefix and more than one data \
                         service is enabled; it was ignored",
                        part,
                        param.name()
                    ));
                    continue;
                }
            }
        }
        if let Some(t) = id.id_type {
            if !param.allowed_types().contains(&t) {
                warnings.push(format!(
                    "identifier '{}' has the wrong type for parameter '{}'; it was ignored",
                    part,
                    param.name()
                ));
                continue;
            }
        }
        out.push(id);
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonicalizes_ma_to_ybp() {
        let ctx =
            RequestContext::from_params(&params(&[("min_ma", "1"), ("max_ma", "2.5")])).unwrap();
        assert_eq!(ctx.window.min_ybp, Some(1.0e6));
        assert_eq!(ctx.window.max_ybp, Some(2.5e6));
        assert_eq!(ctx.time_rule, TimeRule::Major);
    }

    #[test]
    fn min_age_uses_the_request_unit() {
        let ctx = RequestContext::from_params(&params(&[
            ("min_age", "5000"),
            ("ageunit", "ybp"),
        ]))
        .unwrap();
        assert_eq!(ctx.window.min_ybp, Some(5000.0));
        assert_eq!(ctx.age_unit, AgeUnit::Ybp);
    }

    #[test]
    fn rejects_conflicting_age_parameters() {
        let err =
            RequestContext::from_params(&params(&[("min_age", "1"), ("min_ma", "1")])).unwrap_err();
        assert!(matches!(err, CompositeError::BadRequest(_)));
    }

    #[test]
    fn rejects_inverted_window() {
        let err =
            RequestContext::from_params(&params(&[("min_ma", "5"), ("max_ma", "2")])).unwrap_err();
        assert!(matches!(err, CompositeError::BadRequest(_)));
    }

    #[test]
    fn timebuffer_forces_buffer_rule() {
        let ctx = RequestContext::from_params(&params(&[
            ("max_ma", "2"),
            ("min_ma", "1"),
            ("timebuffer", "0.5"),
        ]))
        .unwrap();
        assert_eq!(ctx.time_rule, TimeRule::Buffer);
        assert_eq!(ctx.window.old_buffer_ybp, Some(0.5e6));
        // young buffer defaults to the old buffer
        assert_eq!(ctx.window.young_buffer_ybp, Some(0.5e6));
    }

    #[test]
    fn percentage_timebuffer_is_relative_to_the_range() {
        let ctx = RequestContext::from_params(&params(&[
            ("max_ma", "3"),
            ("min_ma", "1"),
            ("timebuffer", "25%,10%"),
        ]))
        .unwrap();
        assert_eq!(ctx.window.old_buffer_ybp, Some(0.5e6));
        assert_eq!(ctx.window.young_buffer_ybp, Some(0.2e6));
    }

    #[test]
    fn timebuffer_conflicts_with_other_rules() {
        let err = RequestContext::from_params(&params(&[
            ("max_ma", "2"),
            ("timebuffer", "0.5"),
            ("timerule", "major"),
        ]))
        .unwrap_err();
        assert!(matches!(err, CompositeError::BadRequest(_)));
    }

    #[test]
    fn requires_a_selector() {
        let err = RequestContext::from_params(&params(&[("vocab", "pbdb")])).unwrap_err();
        assert!(err.to_string().contains("selector"));
    }

    #[test]
    fn rejects_multiple_name_selectors() {
        let err = RequestContext::from_params(&params(&[
            ("taxon_name", "Canis"),
            ("base_name", "Canis"),
        ]))
        .unwrap_err();
        assert!(matches!(err, CompositeError::BadRequest(_)));
    }

    #[test]
    fn bare_ids_resolve_against_a_single_enabled_service() {
        let ctx = RequestContext::from_params(&params(&[("occ_id", "1001"), ("ds", "n")])).unwrap();
        let ids = ctx
            .ids_for(IdParam::Occ, Domain::Quaternary, IdType::Occ)
            .unwrap();
        assert_eq!(ids, vec![1001]);
    }

    #[test]
    fn bare_ids_with_both_services_enabled_warn_and_drop() {
        let ctx = RequestContext::from_params(&params(&[("occ_id", "1001,pbdb:occ:7")])).unwrap();
        let ids = ctx.ids_for(IdParam::Occ, Domain::Paleo, IdType::Occ).unwrap();
        assert_eq!(ids, vec![7]);
        assert!(ctx.warnings().iter().any(|w| w.contains("no domain prefix")));
    }

    #[test]
    fn mistyped_ids_warn_and_drop() {
        let ctx = RequestContext::from_params(&params(&[("occ_id", "pbdb:txn:41055")])).unwrap();
        let ids = ctx.ids_for(IdParam::Occ, Domain::Paleo, IdType::Occ).unwrap();
        assert!(ids.is_empty());
        assert!(ctx.warnings().iter().any(|w| w.contains("wrong type")));
    }

    #[test]
    fn unknown_domain_is_a_caller_error() {
        let err = RequestContext::from_params(&params(&[("occ_id", "gbif:55")])).unwrap_err();
        assert!(matches!(err, CompositeError::BadRequest(_)));
    }

    #[test]
    fn ds_selects_and_dedups_services() {
        let ctx = RequestContext::from_params(&params(&[
            ("ds", "n,neotoma,pbdb"),
            ("base_name", "Canis"),
        ]))
        .unwrap();
        assert_eq!(ctx.enabled, vec![Domain::Quaternary, Domain::Paleo]);
    }

    #[test]
    fn order_parses_direction_suffixes() {
        let ctx = RequestContext::from_params(&params(&[
            ("base_name", "Canis"),
            ("order", "ageolder.desc,ageyounger"),
        ]))
        .unwrap();
        assert_eq!(
            ctx.order,
            vec![
                OrderSpec {
                    key: OrderKey::AgeOlder,
                    descending: true
                },
                OrderSpec {
                    key: OrderKey::AgeYounger,
                    descending: false
                },
            ]
        );
    }

    #[test]
    fn unknown_show_block_warns() {
        let ctx = RequestContext::from_params(&params(&[
            ("base_name", "Canis"),
            ("show", "coords,bogus"),
        ]))
        .unwrap();
        assert_eq!(ctx.show, vec!["coords".to_string()]);
        assert!(ctx.warnings().iter().any(|w| w.contains("bogus")));
    }

    #[test]
    fn detects_need_for_name_resolution() {
        let ctx = RequestContext::from_params(&params(&[
            ("base_id", "pbdb:txn:41055"),
            ("ds", "n"),
        ]))
        .unwrap();
        assert!(ctx.needs_name_resolution());
        assert_eq!(ctx.paleo_taxon_id(), Some(41055));
    }
}
