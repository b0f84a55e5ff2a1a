//! Subscription endpoints.
//!
//! - `POST   /subscriptions`                  register `{email, country}`
//! - `DELETE /subscriptions?email=&country=`  unregister
//!
//! `country` may be a display name or a slug. Both handlers answer as soon
//! as the registry has been updated; the welcome or farewell mail goes out
//! in the background.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use validator::validate_email;

use crate::api::{error_response, ApiError, SharedState};
use crate::country::{slugify, CountryRef};
use crate::registry::{RegistryError, Subscriber};

#[derive(Debug, Deserialize)]
pub struct SubscriptionRequest {
    pub email: String,
    pub country: String,
}

/// Validated request: a trimmed, well-formed email and a non-empty slug.
fn parse(request: &SubscriptionRequest) -> Result<(String, String), ApiError> {
    let email = request.email.trim();
    if !validate_email(email) {
        return Err(error_response(StatusCode::BAD_REQUEST, "Invalid email address."));
    }
    let slug = slugify(&request.country);
    if slug.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "Country is required."));
    }
    Ok((email.to_string(), slug))
}

/// Resolve `slug` against the provider's country list. `Ok(None)` means the
/// list was reachable and the country isn't on it; an unreachable list
/// falls back to the caller's input.
async fn resolve_country(state: &SharedState, slug: &str, input: &str) -> Option<CountryRef> {
    match state.country_list().await {
        Ok(countries) => countries.into_iter().find(|c| c.slug == slug),
        Err(err) => {
            tracing::warn!(country = %slug, "Country list unavailable, trusting input: {}", err);
            Some(CountryRef {
                name: input.trim().to_string(),
                slug: slug.to_string(),
            })
        }
    }
}

fn storage_error(err: RegistryError) -> ApiError {
    tracing::error!("Subscriber registry error: {}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Subscription storage failed.")
}

/// `POST /subscriptions`
pub async fn subscribe(
    State(state): State<SharedState>,
    Json(body): Json<SubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscriber>), ApiError> {
    let (email, slug) = parse(&body)?;

    let country = resolve_country(&state, &slug, &body.country)
        .await
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Unknown country."))?;

    let subscriber = state
        .registry
        .create(&email, &slug)
        .await
        .map_err(|err| match err {
            RegistryError::Conflict { .. } => error_response(
                StatusCode::CONFLICT,
                "This email has already been used to register for that country.",
            ),
            other => storage_error(other),
        })?;

    tracing::info!(country = %slug, "{} subscribed", email);

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(err) = pipeline.send_welcome(&country, &email).await {
            tracing::warn!(country = %country.slug, recipient = %email, "Welcome mail not sent: {}", err);
        }
    });

    Ok((StatusCode::CREATED, Json(subscriber)))
}

/// `DELETE /subscriptions?email=&country=`
pub async fn unsubscribe(
    State(state): State<SharedState>,
    Query(params): Query<SubscriptionRequest>,
) -> Result<StatusCode, ApiError> {
    let (email, slug) = parse(&params)?;

    state
        .registry
        .delete(&email, &slug)
        .await
        .map_err(|err| match err {
            RegistryError::NotFound { .. } => error_response(
                StatusCode::NOT_FOUND,
                "This email is not registered for that country.",
            ),
            other => storage_error(other),
        })?;

    tracing::info!(country = %slug, "{} unsubscribed", email);

    let country = resolve_country(&state, &slug, &params.country)
        .await
        .unwrap_or_else(|| CountryRef {
            name: params.country.trim().to_string(),
            slug: slug.clone(),
        });
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(err) = pipeline.send_farewell(&country, &email).await {
            tracing::warn!(country = %country.slug, recipient = %email, "Farewell mail not sent: {}", err);
        }
    });

    Ok(StatusCode::NO_CONTENT)
}
