use std::time::Duration;

use bidwatch_core::error::AppError;
use bidwatch_core::form_state::FormState;
use bidwatch_core::traits::Fetcher;
use reqwest::{Client, RequestBuilder};

pub const DEFAULT_USER_AGENT: &str = "bidwatch/0.1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP fetcher using reqwest.
///
/// Keeps a cookie jar across requests: the portal ties its postback state
/// to the session cookie issued with the first page, so every clone of a
/// fetcher shares one session.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_options(DEFAULT_USER_AGENT, DEFAULT_TIMEOUT)
    }

    pub fn with_options(user_agent: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<String, AppError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        tracing::debug!(%url, "GET");
        self.send(self.client.get(url), url).await
    }

    async fn post_form(&self, url: &str, form: &FormState) -> Result<String, AppError> {
        tracing::debug!(%url, fields = form.len(), "POST form");
        self.send(self.client.post(url).form(form.as_pairs()), url)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_once;

    #[tokio::test]
    async fn fetch_returns_body() {
        let (base, request) = serve_once(200, "text/html", "<html>grid</html>").await;
        let fetcher = ReqwestFetcher::new().unwrap();

        let html = fetcher
            .fetch(&format!("{base}/Procurement.aspx"))
            .await
            .unwrap();
        assert_eq!(html, "<html>grid</html>");

        let request = request.await.unwrap();
        assert!(request.head.starts_with("GET /Procurement.aspx"));
        assert!(
            request
                .head
                .to_ascii_lowercase()
                .contains("user-agent: bidwatch/0.1")
        );
    }

    #[tokio::test]
    async fn post_form_sends_fields_urlencoded_in_order() {
        let (base, request) = serve_once(200, "text/html", "<html>page 2</html>").await;
        let fetcher = ReqwestFetcher::new().unwrap();
        let mut form = FormState::new();
        form.set("__VIEWSTATE", "abc/+=");
        let form = form.for_page("ctl00$MainBody$gdvSearchData", 2);

        let html = fetcher
            .post_form(&format!("{base}/Procurement.aspx"), &form)
            .await
            .unwrap();
        assert_eq!(html, "<html>page 2</html>");

        let request = request.await.unwrap();
        assert!(request.head.starts_with("POST /Procurement.aspx"));
        assert!(
            request
                .head
                .to_ascii_lowercase()
                .contains("content-type: application/x-www-form-urlencoded")
        );
        assert_eq!(
            request.body,
            "__VIEWSTATE=abc%2F%2B%3D&__EVENTTARGET=ctl00%24MainBody%24gdvSearchData&__EVENTARGUMENT=Page%242"
        );
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let (base, _request) = serve_once(500, "text/plain", "boom").await;
        let fetcher = ReqwestFetcher::new().unwrap();

        let err = fetcher.fetch(&base).await.unwrap_err();
        match err {
            AppError::HttpError(msg) => assert!(msg.contains("HTTP 500"), "{msg}"),
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limit() {
        let (base, _request) = serve_once(429, "text/plain", "slow down").await;
        let fetcher = ReqwestFetcher::new().unwrap();

        let err = fetcher.fetch(&base).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher.fetch(&format!("http://{addr}/")).await.unwrap_err();
        assert!(err.is_transport());
    }
}
