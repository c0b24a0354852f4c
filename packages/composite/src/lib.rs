//! Composite query engine for federated fossil-occurrence data.
//!
//! One client request fans out to the PaleoBioDB and Neotoma upstream
//! databases as concurrent subqueries under a single deadline. Response
//! bodies are consumed incrementally through a streaming JSON extractor,
//! records are normalized into a unified shape (prefixed identifiers,
//! canonical ages in years before present, derived coordinates), and
//! predicates the upstreams cannot express natively — the major-overlap
//! and buffered time rules — are re-applied here before merging.
//!
//! # Example
//!
//! ```rust,ignore
//! use elc_composite::{Gateway, GatewayOptions, ReqwestSource, RequestContext};
//!
//! let gateway = Gateway::new(
//!     Arc::new(ReqwestSource::new()?),
//!     GatewayOptions {
//!         pbdb_base_url: "https://paleobiodb.org/data1.2".into(),
//!         neotoma_base_url: "https://api.neotomadb.org/v2.0".into(),
//!         timeout: Duration::from_secs(120),
//!         retries: 2,
//!     },
//! );
//!
//! let ctx = RequestContext::from_params(&params)?;
//! let outcome = gateway.occurrence_list(ctx).await?;
//! for record in &outcome.records {
//!     println!("{:?}", record.get("occ_id"));
//! }
//! ```

pub mod adapters;
pub mod age;
pub mod compose;
pub mod driver;
pub mod error;
pub mod extid;
pub mod http;
pub mod json_stream;
pub mod params;
pub mod record;
pub mod request;
pub mod subquery;

pub use age::{AgeUnit, AgeWindow, TimeRule};
pub use compose::{CompositeOutcome, Gateway, GatewayOptions};
pub use driver::{CompositeDriver, DriverOptions, TICK_PERIOD};
pub use error::{CompositeError, Result};
pub use extid::{Domain, ExternalId, IdType};
pub use http::{HttpReply, HttpSource, ReqwestSource};
pub use record::Record;
pub use request::{RequestContext, Vocab};
pub use subquery::{Subquery, SubqueryKind, SubqueryStatus};
