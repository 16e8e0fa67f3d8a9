//! State API client
//!
//! A cell publishes several equivalent state API instances. Each query is
//! sent to them in order until one answers.

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ShowError, ShowResult};

/// Append `segments` to `base`, percent-encoding each one
pub fn build_url(base: &str, segments: &[&str]) -> ShowResult<Url> {
    let mut url = Url::parse(base).map_err(|e| ShowError::invalid_url(base, e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ShowError::invalid_url(base, "cannot be a base URL"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// GET one URL and decode its JSON body
async fn get_one<T: DeserializeOwned>(client: &Client, url: Url) -> ShowResult<T> {
    let url_str = url.to_string();
    debug!(url = %url_str, "GET");

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| ShowError::Http {
            url: url_str.clone(),
            source,
        })?;

    let body = response.text().await.map_err(|source| ShowError::Http {
        url: url_str.clone(),
        source,
    })?;

    serde_json::from_str(&body).map_err(|source| ShowError::Decode {
        url: url_str,
        source,
    })
}

/// GET `segments` from the first state API that answers
///
/// Transport, status and decoding failures move on to the next API. A
/// malformed API URL fails immediately.
pub async fn get<T: DeserializeOwned>(
    client: &Client,
    apis: &[String],
    segments: &[&str],
) -> ShowResult<T> {
    let mut last = None;

    for api in apis {
        let url = build_url(api, segments)?;
        match get_one(client, url).await {
            Ok(value) => return Ok(value),
            Err(e) if e.try_next() => {
                warn!(api = %api, error = %e, "State API failed, trying next");
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    match last {
        Some(e) => Err(ShowError::AllFailed {
            tried: apis.len(),
            last: Box::new(e),
        }),
        None => Err(ShowError::NoStateApi {
            cell: "(unknown)".to_string(),
        }),
    }
}
