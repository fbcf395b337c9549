//! Health probe used by the container `HEALTHCHECK`.

use std::time::Duration;

use reqwest::StatusCode;

/// Why a health probe failed
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },
}

/// GET `url` and succeed only on a 2xx answer within `timeout`
pub async fn probe(url: &str, timeout: Duration) -> Result<(), ProbeError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send().await?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ProbeError::Status {
            url: url.to_string(),
            status,
        })
    }
}
