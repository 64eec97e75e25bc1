//! Login form snapshots taken from the HTML pages of the login flow.

use std::collections::BTreeMap;

use reqwest::Url;
use scraper::{Html, Selector};

use crate::CoreError;
use crate::portal::models::{ActorRole, Credentials};

/// Input receiving the username.
pub const USERNAME_FIELD: &str = "username";
/// Input receiving the password.
pub const PASSWORD_FIELD: &str = "password";
/// Input selecting the actor role.
pub const ACTOR_FIELD: &str = "selected-aktoer";
/// Field naming the identity provider on the first login page.
pub const IDP_FIELD: &str = "selectedIdp";

/// The first form on a login page and the inputs found on that page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Absolute submission URL.
    pub action: Url,
    /// `(name, value)` of every input carrying both attributes, in page order.
    pub inputs: Vec<(String, String)>,
}

impl LoginForm {
    /// Parse a page, resolving the form action against the page URL.
    ///
    /// Inputs are collected from the whole page, not only from inside the form.
    ///
    /// # Errors
    ///
    /// Returns an error if the page has no form, the form has no usable
    /// action, or the action cannot be resolved to a URL.
    pub fn parse(html: &str, page_url: &Url) -> Result<Self, CoreError> {
        let form_selector = selector("form")?;
        let input_selector = selector("input")?;
        let document = Html::parse_document(html);

        let form = document
            .select(&form_selector)
            .next()
            .ok_or_else(|| CoreError::Other(format!("no form on {page_url}")))?;

        let action = form
            .value()
            .attr("action")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| CoreError::Other(format!("form on {page_url} has no action")))?;

        let action = page_url
            .join(action)
            .map_err(|e| CoreError::Other(format!("bad form action {action:?}: {e}")))?;

        let inputs = document
            .select(&input_selector)
            .filter_map(|input| {
                let element = input.value();
                let name = element.attr("name")?;
                let value = element.attr("value")?;
                Some((name.to_string(), value.to_string()))
            })
            .collect();

        Ok(Self { action, inputs })
    }

    /// Build the field map to submit.
    ///
    /// The username, password and actor fields are overwritten; every other
    /// field keeps the value found on the page (hidden tokens and the like).
    #[must_use]
    pub fn fill(&self, credentials: &Credentials, actor: ActorRole) -> BTreeMap<String, String> {
        self.inputs
            .iter()
            .map(|(name, value)| {
                let value = match name.as_str() {
                    USERNAME_FIELD => credentials.username().to_string(),
                    PASSWORD_FIELD => credentials.password().to_string(),
                    ACTOR_FIELD => actor.form_value().to_string(),
                    _ => value.clone(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

fn selector(css: &str) -> Result<Selector, CoreError> {
    Selector::parse(css).map_err(|e| CoreError::Other(format!("invalid selector {css}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://login.example.test/sso/step1").expect("url")
    }

    fn creds() -> Credentials {
        Credentials::new("anna01", "s3cret")
    }

    #[test]
    fn parse_resolves_relative_action_and_keeps_named_inputs() {
        let html = r#"
            <html><body>
              <form method="post" action="/step2">
                <input type="hidden" name="AuthState" value="abc&amp;123">
                <input type="text" name="username" value="">
                <input type="submit" value="Next">
                <input type="checkbox" name="remember">
              </form>
            </body></html>"#;

        let form = LoginForm::parse(html, &page_url()).expect("form");
        assert_eq!(form.action.as_str(), "https://login.example.test/step2");
        assert_eq!(
            form.inputs,
            vec![
                ("AuthState".to_string(), "abc&123".to_string()),
                ("username".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn parse_uses_first_form_only() {
        let html = r#"<form action="https://idp.example.test/a"></form>
                      <form action="https://idp.example.test/b"></form>"#;
        let form = LoginForm::parse(html, &page_url()).expect("form");
        assert_eq!(form.action.as_str(), "https://idp.example.test/a");
        assert!(form.inputs.is_empty());
    }

    #[test]
    fn parse_rejects_pages_without_form_or_action() {
        assert!(LoginForm::parse("<p>Loading...</p>", &page_url()).is_err());
        assert!(LoginForm::parse(r#"<form action=""></form>"#, &page_url()).is_err());
    }

    #[test]
    fn fill_targets_fields_by_exact_name_in_any_order() {
        let orders = [
            vec!["password", "selected-aktoer", "username", "csrf"],
            vec!["csrf", "username", "password", "selected-aktoer"],
            vec!["selected-aktoer", "csrf", "password", "username"],
        ];

        for order in orders {
            let form = LoginForm {
                action: page_url(),
                inputs: order
                    .iter()
                    .map(|name| ((*name).to_string(), format!("page-{name}")))
                    .collect(),
            };
            let fields = form.fill(&creds(), ActorRole::Contact);

            assert_eq!(fields["username"], "anna01");
            assert_eq!(fields["password"], "s3cret");
            assert_eq!(fields["selected-aktoer"], "KONTAKT");
            assert_eq!(fields["csrf"], "page-csrf");
            assert_eq!(fields.len(), 4);
        }
    }

    #[test]
    fn fill_leaves_lookalike_names_untouched() {
        let form = LoginForm {
            action: page_url(),
            inputs: vec![
                ("Username".to_string(), "keep".to_string()),
                ("password_confirm".to_string(), "keep".to_string()),
            ],
        };
        let fields = form.fill(&creds(), ActorRole::Employee);
        assert_eq!(fields["Username"], "keep");
        assert_eq!(fields["password_confirm"], "keep");
    }

    #[test]
    fn fill_uses_employee_actor_when_configured() {
        let form = LoginForm {
            action: page_url(),
            inputs: vec![("selected-aktoer".to_string(), "x".to_string())],
        };
        let fields = form.fill(&creds(), ActorRole::Employee);
        assert_eq!(fields["selected-aktoer"], "MEDARBEJDER_EKSTERN");
    }
}
