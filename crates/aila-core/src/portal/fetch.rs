//! JSON API calls made after login.

use reqwest::Url;
use serde_json::Value;

use crate::CoreError;
use crate::config::PortalConfig;
use crate::portal::auth::AuthenticatedSession;
use crate::portal::models::{PortalPayloads, PortalRole, ProfileContext};

const PROFILES_METHOD: &str = "profiles.getProfilesByLogin";
const NOTIFICATIONS_METHOD: &str = "notifications.getNotificationsForActiveProfile";

/// Fetches posts and message threads with an authenticated session.
#[derive(Debug)]
pub struct DataFetcher {
    session: AuthenticatedSession,
    api_url: String,
    portal_role: PortalRole,
    posts_limit: u32,
}

impl DataFetcher {
    /// Create a fetcher for the configured API.
    #[must_use]
    pub fn new(session: AuthenticatedSession, portal: &PortalConfig) -> Self {
        Self {
            session,
            api_url: portal.api_url.clone(),
            portal_role: portal.portal_role,
            posts_limit: portal.posts_limit,
        }
    }

    /// Run the fixed call sequence and return the posts and threads payloads.
    ///
    /// The profile and notification calls prime the server-side session
    /// state; their bodies are only checked for being JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if any call fails, answers with a non-success status
    /// or returns something other than JSON, or if the profile context lacks
    /// its institutions. A posts or threads document without its array only
    /// logs a warning and reads as empty.
    pub async fn fetch(&self) -> Result<PortalPayloads, CoreError> {
        self.call(PROFILES_METHOD, &[]).await?;

        let context = self
            .call(ProfileContext::METHOD, &[("portalrole", self.portal_role.as_str())])
            .await?;
        let context = ProfileContext::from_response(&context)?;
        log::debug!(
            "profile context: {} institution(s), {} child(ren)",
            context.institution_codes.len(),
            context.child_ids.len()
        );

        let mut params: Vec<(&str, &str)> = Vec::new();
        params.extend(context.child_ids.iter().map(|id| ("activeChildrenIds[]", id.as_str())));
        params.extend(
            context
                .institution_codes
                .iter()
                .map(|code| ("activeInstitutionCodes[]", code.as_str())),
        );
        self.call(NOTIFICATIONS_METHOD, &params).await?;

        let threads = self
            .call(
                PortalPayloads::THREADS_METHOD,
                &[("sortOn", "date"), ("orderDirection", "desc"), ("page", "0")],
            )
            .await?;

        let limit = self.posts_limit.to_string();
        let ids = context.profile_and_child_ids();
        let mut params = vec![("parent", "profile"), ("index", "0")];
        params.extend(ids.iter().map(|id| ("institutionProfileIds[]", id.as_str())));
        params.push(("limit", limit.as_str()));
        let posts = self.call(PortalPayloads::POSTS_METHOD, &params).await?;

        let payloads = PortalPayloads::new(posts, threads);
        log::info!(
            "fetched {} post(s) and {} thread(s)",
            payloads.posts().len(),
            payloads.threads().len()
        );
        Ok(payloads)
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value, CoreError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| CoreError::Config(format!("portal.api_url = {:?}: {e}", self.api_url)))?;
        url.query_pairs_mut()
            .append_pair("method", method)
            .extend_pairs(params.iter().copied());

        log::debug!("calling {method}");
        let session = self.session.session();
        let response = session.send(session.client().get(url), method).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Api(format!("{method} returned HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CoreError::Network(format!("{method}: reading body: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| CoreError::Serialization(format!("{method} did not return JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::{Authenticator, Credentials, PortalSession};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn portal(server: &MockServer) -> PortalConfig {
        PortalConfig {
            login_url: format!("{}/login", server.uri()),
            landing_url: format!("{}/portal/", server.uri()),
            api_url: format!("{}/api/v17/", server.uri()),
            identity_provider: None,
            ..PortalConfig::default()
        }
    }

    async fn logged_in(server: &MockServer, config: &PortalConfig) -> AuthenticatedSession {
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<form action="/go"><input name="username" value=""></form>"#,
                "text/html",
            ))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/go"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/portal/"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/portal/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;

        let session = PortalSession::new(Duration::from_secs(5), 0).expect("session");
        Authenticator::new(session, Credentials::new("anna01", "pw"), config)
            .expect("authenticator")
            .login()
            .await
            .expect("login")
    }

    async fn mount_api(server: &MockServer, api_method: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path("/api/v17/"))
            .and(query_param("method", api_method))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_happy_api(server: &MockServer) {
        mount_api(server, PROFILES_METHOD, json!({"data": {"profiles": []}})).await;
        mount_api(
            server,
            ProfileContext::METHOD,
            json!({"data": {"institutions": [
                {"institutionCode": "A1", "institutionProfileId": 11, "children": [{"id": 101}]},
                {"institutionCode": "B2", "institutionProfileId": 12, "children": [{"id": 102}]}
            ]}}),
        )
        .await;
        mount_api(server, NOTIFICATIONS_METHOD, json!({"data": []})).await;
        mount_api(
            server,
            PortalPayloads::THREADS_METHOD,
            json!({"data": {"threads": [{"subject": "Trip"}]}}),
        )
        .await;
        mount_api(
            server,
            PortalPayloads::POSTS_METHOD,
            json!({"data": {"posts": [{"id": 7}, {"id": 8}]}}),
        )
        .await;
    }

    fn query_values(url: &Url, key: &str) -> Vec<String> {
        url.query_pairs()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    #[tokio::test]
    async fn calls_run_in_order_with_context_parameters() {
        let server = MockServer::start().await;
        let config = portal(&server);
        let session = logged_in(&server, &config).await;
        mount_happy_api(&server).await;

        let payloads = DataFetcher::new(session, &config).fetch().await.expect("fetch");
        assert_eq!(payloads.posts().len(), 2);
        assert_eq!(payloads.threads().len(), 1);

        let requests = server.received_requests().await.expect("recorded");
        let api: Vec<Url> = requests
            .iter()
            .filter(|r| r.url.path() == "/api/v17/")
            .map(|r| r.url.clone())
            .collect();
        let order: Vec<String> = api
            .iter()
            .flat_map(|url| query_values(url, "method"))
            .collect();
        assert_eq!(
            order,
            vec![
                PROFILES_METHOD,
                ProfileContext::METHOD,
                NOTIFICATIONS_METHOD,
                PortalPayloads::THREADS_METHOD,
                PortalPayloads::POSTS_METHOD,
            ]
        );

        assert_eq!(query_values(&api[1], "portalrole"), vec!["guardian"]);
        assert_eq!(query_values(&api[2], "activeChildrenIds[]"), vec!["101", "102"]);
        assert_eq!(query_values(&api[2], "activeInstitutionCodes[]"), vec!["A1", "B2"]);
        assert_eq!(query_values(&api[3], "orderDirection"), vec!["desc"]);
        assert_eq!(
            query_values(&api[4], "institutionProfileIds[]"),
            vec!["11", "12", "101", "102"]
        );
        assert_eq!(query_values(&api[4], "limit"), vec!["2"]);
    }

    #[tokio::test]
    async fn non_json_body_is_a_serialization_error() {
        let server = MockServer::start().await;
        let config = portal(&server);
        let session = logged_in(&server, &config).await;
        Mock::given(method("GET"))
            .and(path("/api/v17/"))
            .and(query_param("method", PROFILES_METHOD))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"))
            .mount(&server)
            .await;

        let err = DataFetcher::new(session, &config).fetch().await.expect_err("html body");
        assert!(matches!(err, CoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn error_status_is_an_api_error() {
        let server = MockServer::start().await;
        let config = portal(&server);
        let session = logged_in(&server, &config).await;
        Mock::given(method("GET"))
            .and(path("/api/v17/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = DataFetcher::new(session, &config).fetch().await.expect_err("forbidden");
        assert!(matches!(err, CoreError::Api(ref msg) if msg.contains("403")));
    }

    #[tokio::test]
    async fn missing_threads_array_keeps_the_posts() {
        let server = MockServer::start().await;
        let config = portal(&server);
        let session = logged_in(&server, &config).await;
        mount_api(&server, PROFILES_METHOD, json!({})).await;
        mount_api(
            &server,
            ProfileContext::METHOD,
            json!({"data": {"institutions": []}}),
        )
        .await;
        mount_api(&server, NOTIFICATIONS_METHOD, json!({})).await;
        mount_api(&server, PortalPayloads::THREADS_METHOD, json!({"status": {"code": 500}})).await;
        mount_api(
            &server,
            PortalPayloads::POSTS_METHOD,
            json!({"data": {"posts": [{"id": 7}]}}),
        )
        .await;

        let payloads = DataFetcher::new(session, &config).fetch().await.expect("fetch");
        assert_eq!(payloads.posts().len(), 1);
        assert!(payloads.threads().is_empty());
        assert_eq!(payloads.malformed().len(), 1);
    }
}
