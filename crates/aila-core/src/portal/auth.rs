//! Form-driven login against the portal.
//!
//! The portal has no login API. Signing in means walking a chain of HTML
//! forms (identity provider picker, username, password, role picker, SAML
//! relays) whose exact order is not fixed. The authenticator therefore
//! reacts to whatever form the latest page shows:
//!
//! 1. Parse the first form of the page and every input on it
//! 2. Fill in username, password and actor role, keep every other value
//! 3. Post the fields to the form action
//! 4. Stop once the response lands on the portal front page
//!
//! Every submission counts against a fixed budget, so a changed login flow
//! ends in [`CoreError::AuthenticationFailed`] instead of looping forever.

use reqwest::{Response, StatusCode, Url};

use crate::CoreError;
use crate::config::PortalConfig;
use crate::portal::form::{IDP_FIELD, LoginForm};
use crate::portal::models::{ActorRole, Credentials};
use crate::portal::session::PortalSession;

/// One page received during the login flow.
#[derive(Debug, Clone)]
pub struct LoginPage {
    /// Final URL after redirects.
    pub url: Url,
    /// HTTP status of the response.
    pub status: StatusCode,
    /// Response body.
    pub body: String,
}

impl LoginPage {
    async fn read(response: Response) -> Result<Self, CoreError> {
        let url = response.url().clone();
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::Network(format!("reading {url}: {e}")))?;
        Ok(Self { url, status, body })
    }
}

/// State of the login state machine.
#[derive(Debug)]
pub enum LoginState {
    /// The latest page still shows a form to submit.
    AwaitingForm(LoginPage),
    /// The landing page was reached.
    Authenticated(LoginPage),
    /// The budget ran out before the landing page appeared.
    Failed {
        /// Iterations that ran.
        attempts: u32,
        /// Status of the last page seen.
        last_status: StatusCode,
    },
}

/// Summary of a successful login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Forms submitted inside the login loop.
    pub submissions: u32,
    /// Status of the landing page response.
    pub status: StatusCode,
}

/// A session that reached the landing page.
///
/// Only the login flow can create one, so API calls cannot run on an
/// unauthenticated session.
#[derive(Debug)]
pub struct AuthenticatedSession {
    session: PortalSession,
    outcome: LoginOutcome,
}

impl AuthenticatedSession {
    /// How the login went.
    #[must_use]
    pub const fn outcome(&self) -> LoginOutcome {
        self.outcome
    }

    pub(crate) const fn session(&self) -> &PortalSession {
        &self.session
    }
}

/// Drives the login flow for one session.
#[derive(Debug)]
pub struct Authenticator {
    session: PortalSession,
    credentials: Credentials,
    login_url: Url,
    landing_url: Url,
    identity_provider: Option<String>,
    actor: ActorRole,
    budget: u32,
}

impl Authenticator {
    /// Create an authenticator that owns `session` for the duration of the login.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured login or landing URL is invalid.
    pub fn new(
        session: PortalSession,
        credentials: Credentials,
        portal: &PortalConfig,
    ) -> Result<Self, CoreError> {
        let login_url = parse_url("portal.login_url", &portal.login_url)?;
        let landing_url = parse_url("portal.landing_url", &portal.landing_url)?;

        Ok(Self {
            session,
            credentials,
            login_url,
            landing_url,
            identity_provider: portal.identity_provider.clone(),
            actor: portal.actor,
            budget: portal.login_attempts,
        })
    }

    /// Run the login flow.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AuthenticationFailed`] if the landing page is not
    /// reached within the budget or answers with a status other than 200 (a
    /// login or identity provider page without a form counts as a spent
    /// iteration), and a network error if the login page itself cannot be
    /// loaded.
    pub async fn login(self) -> Result<AuthenticatedSession, CoreError> {
        let first = self.open_login_page().await?;

        let mut attempts = 0;
        let mut state = LoginState::AwaitingForm(first);
        loop {
            state = match state {
                LoginState::AwaitingForm(page) if attempts >= self.budget => LoginState::Failed {
                    attempts,
                    last_status: page.status,
                },
                LoginState::AwaitingForm(page) => {
                    attempts += 1;
                    self.step(page, attempts).await
                }
                done => break self.finish(done, attempts),
            };
        }
    }

    async fn open_login_page(&self) -> Result<LoginPage, CoreError> {
        log::debug!("opening login page {}", self.login_url);
        let request = self.session.client().get(self.login_url.clone());
        let page = LoginPage::read(self.session.send(request, "login page").await?).await?;

        let Some(ref idp) = self.identity_provider else {
            return Ok(page);
        };

        // A page without the picker goes to the loop, which spends the budget on it
        let form = match LoginForm::parse(&page.body, &page.url) {
            Ok(form) => form,
            Err(e) => {
                log::warn!("identity provider {idp}: {e}");
                return Ok(page);
            }
        };
        // The identity provider picker posts a single field instead of its inputs
        log::debug!("selecting identity provider {idp} at {}", form.action);
        let request = self
            .session
            .client()
            .post(form.action)
            .form(&[(IDP_FIELD, idp.as_str())]);
        LoginPage::read(self.session.send(request, "identity provider").await?).await
    }

    /// Submit the form on `page` and classify the response.
    ///
    /// Failures stay in `AwaitingForm` with the same page; the iteration is
    /// still spent.
    async fn step(&self, page: LoginPage, attempt: u32) -> LoginState {
        let form = match LoginForm::parse(&page.body, &page.url) {
            Ok(form) => form,
            Err(e) => {
                log::warn!("login step {attempt}: {e}");
                return LoginState::AwaitingForm(page);
            }
        };

        let fields = form.fill(&self.credentials, self.actor);
        log::debug!(
            "login step {attempt}: posting {} field(s) to {}",
            fields.len(),
            form.action
        );

        let request = self.session.client().post(form.action);
        let request = if fields.is_empty() {
            request
        } else {
            request.form(&fields)
        };

        let next = match self.session.send(request, "login form").await {
            Ok(response) => LoginPage::read(response).await,
            Err(e) => Err(e),
        };

        match next {
            Ok(next) if next.url == self.landing_url => {
                log::info!("login reached the portal after {attempt} step(s)");
                LoginState::Authenticated(next)
            }
            Ok(next) => LoginState::AwaitingForm(next),
            Err(e) => {
                log::warn!("login step {attempt}: {e}");
                LoginState::AwaitingForm(page)
            }
        }
    }

    fn finish(self, state: LoginState, attempts: u32) -> Result<AuthenticatedSession, CoreError> {
        match state {
            LoginState::Authenticated(page) if page.status == StatusCode::OK => {
                Ok(AuthenticatedSession {
                    session: self.session,
                    outcome: LoginOutcome {
                        submissions: attempts,
                        status: page.status,
                    },
                })
            }
            LoginState::Authenticated(page) => Err(CoreError::AuthenticationFailed {
                attempts,
                status: Some(page.status.as_u16()),
            }),
            LoginState::Failed {
                attempts,
                last_status,
            } => Err(CoreError::AuthenticationFailed {
                attempts,
                status: Some(last_status.as_u16()),
            }),
            LoginState::AwaitingForm(page) => Err(CoreError::AuthenticationFailed {
                attempts,
                status: Some(page.status.as_u16()),
            }),
        }
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|e| CoreError::Config(format!("{key} = {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn form_page(action: &str, inputs: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(
            format!(r#"<html><body><form method="post" action="{action}">{inputs}</form></body></html>"#),
            "text/html",
        )
    }

    fn portal(server: &MockServer, budget: u32) -> PortalConfig {
        PortalConfig {
            login_url: format!("{}/login", server.uri()),
            landing_url: format!("{}/portal/", server.uri()),
            api_url: format!("{}/api/", server.uri()),
            identity_provider: None,
            login_attempts: budget,
            ..PortalConfig::default()
        }
    }

    fn authenticator(config: &PortalConfig) -> Authenticator {
        let session = PortalSession::new(Duration::from_secs(5), 0).expect("session");
        Authenticator::new(session, Credentials::new("anna01", "s3cret"), config)
            .expect("authenticator")
    }

    async fn mount_landing(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/portal/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<h1>Aula</h1>", "text/html"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn two_page_login_succeeds_after_two_submissions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(form_page(
                "/step2",
                r#"<input name="username" value=""><input name="selected-aktoer" value="x">"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/step2"))
            .and(body_string_contains("username=anna01"))
            .and(body_string_contains("selected-aktoer=KONTAKT"))
            .respond_with(form_page(
                "/step3",
                r#"<input type="password" name="password" value=""><input type="hidden" name="token" value="t-1">"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/step3"))
            .and(body_string_contains("password=s3cret"))
            .and(body_string_contains("token=t-1"))
            .respond_with(ResponseTemplate::new(303).insert_header("Location", "/portal/"))
            .expect(1)
            .mount(&server)
            .await;
        mount_landing(&server).await;

        let config = portal(&server, 10);
        let session = authenticator(&config).login().await.expect("login succeeds");

        assert_eq!(
            session.outcome(),
            LoginOutcome {
                submissions: 2,
                status: StatusCode::OK,
            }
        );
    }

    #[tokio::test]
    async fn endless_forms_fail_after_exactly_the_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(form_page("/again", r#"<input name="username" value="">"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/again"))
            .respond_with(form_page("/again", r#"<input name="username" value="">"#))
            .expect(10)
            .mount(&server)
            .await;

        let config = portal(&server, 10);
        let err = authenticator(&config).login().await.expect_err("never lands");

        assert!(matches!(
            err,
            CoreError::AuthenticationFailed {
                attempts: 10,
                status: Some(200)
            }
        ));
    }

    #[tokio::test]
    async fn pages_without_form_spend_the_budget_without_posting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<p>maintenance</p>", "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = portal(&server, 3);
        let err = authenticator(&config).login().await.expect_err("no form");
        assert!(matches!(err, CoreError::AuthenticationFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn missing_identity_provider_picker_is_an_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<p>maintenance</p>", "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = portal(&server, 3);
        config.identity_provider = Some("uni_idp".to_string());
        let err = authenticator(&config).login().await.expect_err("no picker");
        assert!(matches!(
            err,
            CoreError::AuthenticationFailed {
                attempts: 3,
                status: Some(200)
            }
        ));
    }

    #[tokio::test]
    async fn form_without_named_inputs_is_posted_bare() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(form_page("/relay", r#"<input type="submit" value="Continue">"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/relay"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/portal/"))
            .expect(1)
            .mount(&server)
            .await;
        mount_landing(&server).await;

        let config = portal(&server, 10);
        let session = authenticator(&config).login().await.expect("login");
        assert_eq!(session.outcome().submissions, 1);

        let requests = server.received_requests().await.expect("recorded requests");
        let relay = requests
            .iter()
            .find(|r| r.url.path() == "/relay")
            .expect("relay request");
        assert!(relay.body.is_empty());
    }

    #[tokio::test]
    async fn identity_provider_is_selected_before_the_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(form_page("/idp", r#"<input name="selectedIdp" value="">"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/idp"))
            .and(body_string_contains("selectedIdp=uni_idp"))
            .respond_with(form_page("/user", r#"<input name="username" value="">"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(303).insert_header("Location", "/portal/"))
            .expect(1)
            .mount(&server)
            .await;
        mount_landing(&server).await;

        let mut config = portal(&server, 10);
        config.identity_provider = Some("uni_idp".to_string());
        let session = authenticator(&config).login().await.expect("login");
        assert_eq!(session.outcome().submissions, 1);
    }

    #[tokio::test]
    async fn landing_page_with_error_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(form_page("/user", r#"<input name="username" value="">"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(303).insert_header("Location", "/portal/"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/portal/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = portal(&server, 10);
        let err = authenticator(&config).login().await.expect_err("bad status");
        assert!(matches!(
            err,
            CoreError::AuthenticationFailed {
                attempts: 1,
                status: Some(503)
            }
        ));
    }

    #[test]
    fn invalid_urls_are_config_errors() {
        let config = PortalConfig {
            login_url: "not a url".to_string(),
            ..PortalConfig::default()
        };
        let session = PortalSession::new(Duration::from_secs(5), 0).expect("session");
        let err = Authenticator::new(session, Credentials::new("a", "b"), &config)
            .expect_err("invalid url");
        assert!(matches!(err, CoreError::Config(_)));
    }
}
