//! HTTP transport to a `cardsync-server` database.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::peer::Peer;
use crate::auth::API_KEY_HEADER;
use crate::errors::{ErrorResponse, StoreError};
use crate::models::{
    BulkDocsRequest, BulkDocsResponse, ChangesPage, DbInfo, Document, RevRef, RevsDiffRequest,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Slack on top of a long-poll wait before the request itself times out.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// A database served over HTTP, addressed by its URL (e.g. `http://host:5984/db`).
#[derive(Clone, Debug)]
pub struct HttpPeer {
    client: Client,
    base: Url,
    api_key: Option<String>,
}

impl HttpPeer {
    pub fn new(base: Url, api_key: Option<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(StoreError::from)?;

        Ok(Self {
            client,
            base,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();

        if status.is_success() {
            let envelope: Envelope<T> = response.json().await?;
            return Ok(envelope.data);
        }

        let text = response.text().await?;
        match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(body) => Err(body.error.into()),
            Err(_) => Err(StoreError::Internal(format!(
                "Sync server returned {}: {}",
                status, text
            ))),
        }
    }
}

#[async_trait]
impl Peer for HttpPeer {
    fn describe(&self) -> String {
        self.base.to_string()
    }

    async fn info(&self) -> Result<DbInfo, StoreError> {
        self.send(
            self.client
                .get(self.endpoint(""))
                .timeout(REQUEST_TIMEOUT),
        )
        .await
    }

    async fn changes(&self, since: i64, limit: usize) -> Result<ChangesPage, StoreError> {
        self.send(
            self.client
                .get(self.endpoint("_changes"))
                .query(&[("since", since.to_string()), ("limit", limit.to_string())])
                .timeout(REQUEST_TIMEOUT),
        )
        .await
    }

    async fn revs_diff(&self, offered: &[RevRef]) -> Result<Vec<RevRef>, StoreError> {
        let body = RevsDiffRequest {
            revs: offered.to_vec(),
        };
        self.send(
            self.client
                .post(self.endpoint("_revs_diff"))
                .json(&body)
                .timeout(REQUEST_TIMEOUT),
        )
        .await
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<usize, StoreError> {
        let body = BulkDocsRequest { docs };
        let response: BulkDocsResponse = self
            .send(
                self.client
                    .post(self.endpoint("_bulk_docs"))
                    .json(&body)
                    .timeout(REQUEST_TIMEOUT),
            )
            .await?;
        Ok(response.accepted)
    }

    async fn wait_for_change(&self, since: i64, timeout: Duration) -> Result<bool, StoreError> {
        let page: ChangesPage = self
            .send(
                self.client
                    .get(self.endpoint("_changes"))
                    .query(&[
                        ("since", since.to_string()),
                        ("limit", "1".to_string()),
                        ("timeout", timeout.as_millis().to_string()),
                    ])
                    .timeout(timeout + LONG_POLL_GRACE),
            )
            .await?;
        Ok(!page.results.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let peer = HttpPeer::new(Url::parse("http://localhost:5984/db/").unwrap(), None).unwrap();
        assert_eq!(peer.endpoint(""), "http://localhost:5984/db");
        assert_eq!(peer.endpoint("_changes"), "http://localhost:5984/db/_changes");
    }

    #[tokio::test]
    async fn test_refused_connection_reports_code() {
        let peer = HttpPeer::new(Url::parse("http://127.0.0.1:1/db").unwrap(), None).unwrap();
        let err = peer.info().await.unwrap_err();
        assert_eq!(err.code(), "ECONNREFUSED");
    }
}
