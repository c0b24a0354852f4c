//! Composite occurrence endpoints: `occs/list.<fmt>` and `occs/single.<fmt>`.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use elc_composite::RequestContext;
use tracing::debug;

use crate::server::app::AxumAppState;
use crate::server::error::ApiError;
use crate::server::format::{respond, Format};

pub async fn occs_handler(
    State(state): State<AxumAppState>,
    Path(op): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response, ApiError> {
    let (operation, fmt) = op.split_once('.').ok_or(ApiError::NotFound)?;
    let format = Format::parse(fmt).ok_or(ApiError::NotFound)?;
    debug!(operation, ?format, params = params.len(), "composite request");

    let ctx = RequestContext::from_params(&params)?;
    let outcome = match operation {
        "list" => state.gateway.occurrence_list(ctx).await?,
        "single" => state.gateway.occurrence_single(ctx).await?,
        _ => return Err(ApiError::NotFound),
    };
    Ok(respond(format, &outcome))
}
