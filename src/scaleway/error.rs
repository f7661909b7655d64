//! Translation of Scaleway API failures into [`ProviderError`].

use scaleway_rs::{ScalewayApiError, ScalewayError};

use crate::provider::ProviderError;

/// Maps a non-success HTTP response to a [`ProviderError`] carrying the
/// status, preferring the structured API message when the body has one.
pub(super) fn api_error(status: u16, body: &[u8]) -> ProviderError {
    let message = serde_json::from_slice::<ScalewayApiError>(body).map_or_else(
        |_| String::from_utf8_lossy(body).trim().to_owned(),
        |api_err| render_api_error(&api_err),
    );
    ProviderError::with_status(status, message)
}

fn render_api_error(api_err: &ScalewayApiError) -> String {
    match (api_err.resource.as_deref(), api_err.resource_id.as_deref()) {
        (Some(resource), Some(id)) => {
            format!("{} ({resource} {id}): {}", api_err.etype, api_err.message)
        }
        (Some(resource), None) => format!("{} ({resource}): {}", api_err.etype, api_err.message),
        _ => format!("{}: {}", api_err.etype, api_err.message),
    }
}

/// Maps a transport failure; a status is only kept when the server sent one.
pub(super) fn transport_error(err: &reqwest::Error) -> ProviderError {
    match err.status() {
        Some(status) => ProviderError::with_status(status.as_u16(), err.to_string()),
        None => ProviderError::fatal(err.to_string()),
    }
}

/// Maps failures from the `scaleway-rs` builders, which do not expose the
/// HTTP status.
pub(super) fn sdk_error(context: &str, err: &ScalewayError) -> ProviderError {
    ProviderError::fatal(format!("{context}: {err}"))
}
