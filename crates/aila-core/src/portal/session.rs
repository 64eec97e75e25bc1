//! Cookie-carrying HTTP session shared by the login flow and the API fetcher.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, redirect};

use crate::CoreError;
use crate::config::RuntimeConfig;

/// Browser-like user agent; the login pages reject unknown clients.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Redirect hops followed per request.
const MAX_REDIRECTS: usize = 10;

/// Delay added per retry attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// HTTP session for one fetch cycle.
///
/// Cookies live in the client's in-memory jar and are dropped with the session.
#[derive(Debug)]
pub struct PortalSession {
    http_client: Client,
    retries: u32,
}

impl PortalSession {
    /// Create a new session with a bounded request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if HTTP client creation fails.
    pub fn new(timeout: Duration, retries: u32) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Other(format!("creating HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            retries,
        })
    }

    /// Create a session from the runtime settings.
    ///
    /// # Errors
    ///
    /// Returns an error if HTTP client creation fails.
    pub fn from_runtime(runtime: &RuntimeConfig) -> Result<Self, CoreError> {
        Self::new(runtime.request_timeout(), runtime.retries)
    }

    pub(crate) const fn client(&self) -> &Client {
        &self.http_client
    }

    /// Send a request, retrying timeouts and connection failures.
    ///
    /// `what` names the request in log lines and errors.
    pub(crate) async fn send(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Response, CoreError> {
        let mut attempt = 0;
        loop {
            let Some(this_try) = request.try_clone() else {
                // Streaming bodies cannot be replayed
                return request
                    .send()
                    .await
                    .map_err(|e| CoreError::Network(format!("{what}: {e}")));
            };

            match this_try.send().await {
                Ok(response) => return Ok(response),
                Err(e) if is_transient(&e) && attempt < self.retries => {
                    attempt += 1;
                    log::debug!("{what}: transient failure ({e}), retry {attempt}/{}", self.retries);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) if is_transient(&e) => {
                    log::warn!("{what}: giving up after {} retries: {e}", self.retries);
                    return Err(CoreError::Network(format!("{what}: {e}")));
                }
                Err(e) => return Err(CoreError::Api(format!("{what}: {e}"))),
            }
        }
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_refused_is_retried_then_surfaced() {
        // Bind and drop a listener to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let session = PortalSession::new(Duration::from_secs(2), 1).expect("session");
        let request = session.client().get(format!("http://{addr}/"));
        let err = session.send(request, "probe").await.expect_err("nothing listening");

        assert!(matches!(err, CoreError::Network(ref msg) if msg.starts_with("probe:")));
    }

    #[tokio::test]
    async fn successful_response_is_returned() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let session = PortalSession::new(Duration::from_secs(5), 2).expect("session");
        let request = session.client().get(server.uri());
        let response = session.send(request, "ping").await.expect("response");
        assert_eq!(response.status().as_u16(), 204);
    }
}
