use axum::{extract::State, http::StatusCode, Json};

use crate::api::{error_response, ApiError, SharedState};
use crate::country::CountryRef;

/// `GET /countries`: every country the provider reports on, as
/// `[{name, slug}]`.
pub async fn list_countries(State(state): State<SharedState>) -> Result<Json<Vec<CountryRef>>, ApiError> {
    let countries = state.country_list().await.map_err(|err| {
        tracing::warn!("Country list unavailable: {}", err);
        error_response(StatusCode::BAD_GATEWAY, "Country list is temporarily unavailable")
    })?;
    Ok(Json(countries))
}
