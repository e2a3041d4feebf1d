use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

use crate::error::InvocationError;

/// Sends a request and decodes a JSON body, classifying every failure.
pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, InvocationError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(InvocationError::from_status(status.as_u16(), body));
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| InvocationError::malformed_response(format!("undecodable body: {e}")))
}
