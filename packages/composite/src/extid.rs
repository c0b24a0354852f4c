//! Prefixed external identifiers of the form `domain:type:number`.
//!
//! Responses never carry bare numeric ids: every record identifier is
//! prefixed so its origin database stays explicit after merging
//! (`pbdb:occ:1001`, `neotoma:sit:42`).

use std::fmt;

use thiserror::Error;

/// The upstream database an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Paleo,
    Quaternary,
}

impl Domain {
    /// Wire prefix used in emitted identifiers.
    pub fn prefix(self) -> &'static str {
        match self {
            Domain::Paleo => "pbdb",
            Domain::Quaternary => "neotoma",
        }
    }

    /// Human-readable upstream name, used as the warning/label prefix.
    pub fn label(self) -> &'static str {
        match self {
            Domain::Paleo => "PaleoBioDB",
            Domain::Quaternary => "Neotoma",
        }
    }

    /// Case-insensitive alias match. Covers the `ds` selector values and
    /// identifier prefixes.
    pub fn from_alias(s: &str) -> Option<Domain> {
        match s.to_ascii_lowercase().as_str() {
            "pbdb" | "paleo" | "p" => Some(Domain::Paleo),
            "neotoma" | "quaternary" | "quat" | "n" => Some(Domain::Quaternary),
            _ => None,
        }
    }
}

/// Identifier type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdType {
    Occ,
    Col,
    Sit,
    Txn,
    Dst,
    Unk,
}

impl IdType {
    pub fn tag(self) -> &'static str {
        match self {
            IdType::Occ => "occ",
            IdType::Col => "col",
            IdType::Sit => "sit",
            IdType::Txn => "txn",
            IdType::Dst => "dst",
            IdType::Unk => "unk",
        }
    }

    pub fn from_tag(s: &str) -> Option<IdType> {
        match s.to_ascii_lowercase().as_str() {
            "occ" => Some(IdType::Occ),
            "col" => Some(IdType::Col),
            "sit" => Some(IdType::Sit),
            "txn" => Some(IdType::Txn),
            "dst" => Some(IdType::Dst),
            "unk" => Some(IdType::Unk),
            _ => None,
        }
    }
}

/// A parsed identifier. Domain and type may be absent on input (`"1001"`,
/// `"pbdb:1001"`); emitted identifiers always carry both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalId {
    pub domain: Option<Domain>,
    pub id_type: Option<IdType>,
    pub num: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("unknown identifier domain in '{0}'")]
    UnknownDomain(String),
    #[error("unknown identifier type in '{0}'")]
    UnknownType(String),
    #[error("invalid identifier '{0}'")]
    Invalid(String),
}

impl ExternalId {
    /// Parse one of: `1001`, `pbdb:1001`, `pbdb:occ:1001`.
    pub fn parse(s: &str) -> Result<ExternalId, IdParseError> {
        let s = s.trim();
        let parts: Vec<&str> = s.split(':').collect();
        let (domain, id_type, num_part) = match parts.as_slice() {
            [num] => (None, None, *num),
            [dom, num] => {
                let domain =
                    Domain::from_alias(dom).ok_or_else(|| IdParseError::UnknownDomain(s.into()))?;
                (Some(domain), None, *num)
            }
            [dom, typ, num] => {
                let domain =
                    Domain::from_alias(dom).ok_or_else(|| IdParseError::UnknownDomain(s.into()))?;
                let id_type =
                    IdType::from_tag(typ).ok_or_else(|| IdParseError::UnknownType(s.into()))?;
                (Some(domain), Some(id_type), *num)
            }
            _ => return Err(IdParseError::Invalid(s.into())),
        };
        let num: u64 = num_part
            .parse()
            .map_err(|_| IdParseError::Invalid(s.into()))?;
        if num == 0 {
            return Err(IdParseError::Invalid(s.into()));
        }
        Ok(ExternalId {
            domain,
            id_type,
            num,
        })
    }

    /// Canonical `domain:type:number` string.
    pub fn format(domain: Domain, id_type: IdType, num: u64) -> String {
        format!("{}:{}:{}", domain.prefix(), id_type.tag(), num)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.domain, self.id_type) {
            (Some(d), Some(t)) => write!(f, "{}:{}:{}", d.prefix(), t.tag(), self.num),
            (Some(d), None) => write!(f, "{}:{}", d.prefix(), self.num),
            _ => write!(f, "{}", self.num),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_shapes() {
        assert_eq!(
            ExternalId::parse("1001").unwrap(),
            ExternalId {
                domain: None,
                id_type: None,
                num: 1001
            }
        );
        assert_eq!(
            ExternalId::parse("pbdb:1001").unwrap(),
            ExternalId {
                domain: Some(Domain::Paleo),
                id_type: None,
                num: 1001
            }
        );
        assert_eq!(
            ExternalId::parse("neotoma:sit:7").unwrap(),
            ExternalId {
                domain: Some(Domain::Quaternary),
                id_type: Some(IdType::Sit),
                num: 7
            }
        );
    }

    #[test]
    fn domain_aliases_are_case_insensitive() {
        for alias in ["PBDB", "Paleo", "p"] {
            assert_eq!(Domain::from_alias(alias), Some(Domain::Paleo));
        }
        for alias in ["Neotoma", "QUAT", "quaternary", "N"] {
            assert_eq!(Domain::from_alias(alias), Some(Domain::Quaternary));
        }
    }

    #[test]
    fn rejects_unknown_domain_and_type() {
        assert_eq!(
            ExternalId::parse("gbif:123"),
            Err(IdParseError::UnknownDomain("gbif:123".into()))
        );
        assert_eq!(
            ExternalId::parse("pbdb:xyz:123"),
            Err(IdParseError::UnknownType("pbdb:xyz:123".into()))
        );
    }

    #[test]
    fn rejects_non_positive_numbers() {
        assert!(ExternalId::parse("0").is_err());
        assert!(ExternalId::parse("pbdb:occ:-4").is_err());
        assert!(ExternalId::parse("pbdb:occ:abc").is_err());
    }

    #[test]
    fn format_parse_round_trip() {
        for (d, t, n) in [
            (Domain::Paleo, IdType::Occ, 1u64),
            (Domain::Paleo, IdType::Txn, 41055),
            (Domain::Quaternary, IdType::Dst, 982),
        ] {
            let s = ExternalId::format(d, t, n);
            let parsed = ExternalId::parse(&s).unwrap();
            assert_eq!(parsed.domain, Some(d));
            assert_eq!(parsed.id_type, Some(t));
            assert_eq!(parsed.num, n);
        }
    }
}
