//! Data models for the Aula portal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Username and password submitted into the login forms.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials from a username and password.
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// The portal username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Actor chosen on the role picker (`selected-aktoer`) during login.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    /// Parent or other guardian.
    #[default]
    Contact,
    /// External employee.
    Employee,
}

impl ActorRole {
    /// Value the portal expects in the `selected-aktoer` field.
    #[must_use]
    pub const fn form_value(self) -> &'static str {
        match self {
            Self::Contact => "KONTAKT",
            Self::Employee => "MEDARBEJDER_EKSTERN",
        }
    }
}

/// Role passed as `portalrole` when requesting the profile context.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortalRole {
    /// Parents and other guardians.
    #[default]
    Guardian,
    /// School and kindergarten staff.
    Employee,
}

impl PortalRole {
    /// Query parameter value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guardian => "guardian",
            Self::Employee => "employee",
        }
    }
}

/// Institutions and children reachable from the logged-in profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileContext {
    /// Institution codes, one per institution.
    pub institution_codes: Vec<String>,
    /// Institution-profile ids, one per institution.
    pub institution_profile_ids: Vec<String>,
    /// Ids of every child across all institutions.
    pub child_ids: Vec<String>,
}

impl ProfileContext {
    /// Method name the context is fetched with.
    pub const METHOD: &'static str = "profiles.getProfileContext";

    /// Collect codes and ids from a `profiles.getProfileContext` response.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnexpectedShape`] if `data.institutions` is not an
    /// array or an institution lacks one of the expected keys.
    pub fn from_response(response: &Value) -> Result<Self> {
        let institutions = response["data"]["institutions"]
            .as_array()
            .ok_or_else(|| CoreError::shape(Self::METHOD, "data.institutions"))?;

        let mut context = Self::default();
        for institution in institutions {
            let code = id_string(&institution["institutionCode"])
                .ok_or_else(|| CoreError::shape(Self::METHOD, "institutions[].institutionCode"))?;
            let profile_id = id_string(&institution["institutionProfileId"]).ok_or_else(|| {
                CoreError::shape(Self::METHOD, "institutions[].institutionProfileId")
            })?;
            context.institution_codes.push(code);
            context.institution_profile_ids.push(profile_id);

            let children = institution["children"]
                .as_array()
                .ok_or_else(|| CoreError::shape(Self::METHOD, "institutions[].children"))?;
            for child in children {
                let child_id = id_string(&child["id"])
                    .ok_or_else(|| CoreError::shape(Self::METHOD, "children[].id"))?;
                context.child_ids.push(child_id);
            }
        }

        Ok(context)
    }

    /// Institution-profile ids followed by child ids, as `posts.getAllPosts` wants them.
    #[must_use]
    pub fn profile_and_child_ids(&self) -> Vec<String> {
        self.institution_profile_ids
            .iter()
            .chain(&self.child_ids)
            .cloned()
            .collect()
    }
}

/// Raw post and message-thread payloads from one fetch.
///
/// Both documents are passed through unmodified. A document without its
/// array is kept but reads as empty, so a broken threads answer does not
/// cost the posts (and the other way round).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalPayloads {
    posts: Value,
    threads: Value,
}

impl PortalPayloads {
    /// Method returning the posts payload.
    pub const POSTS_METHOD: &'static str = "posts.getAllPosts";
    /// Method returning the threads payload.
    pub const THREADS_METHOD: &'static str = "messaging.getThreads";

    /// Wrap the two payloads, logging a warning for each one that lacks its
    /// array.
    #[must_use]
    pub fn new(posts: Value, threads: Value) -> Self {
        let payloads = Self { posts, threads };
        for problem in payloads.malformed() {
            log::warn!("ignoring payload: {problem}");
        }
        payloads
    }

    /// One [`CoreError::UnexpectedShape`] per document that lacks its array.
    #[must_use]
    pub fn malformed(&self) -> Vec<CoreError> {
        [
            (&self.posts, "posts", Self::POSTS_METHOD, "data.posts"),
            (&self.threads, "threads", Self::THREADS_METHOD, "data.threads"),
        ]
        .into_iter()
        .filter(|(doc, key, _, _)| !doc["data"][*key].is_array())
        .map(|(_, _, method, path)| CoreError::shape(method, path))
        .collect()
    }

    /// Entries of `data.posts`.
    #[must_use]
    pub fn posts(&self) -> &[Value] {
        self.posts["data"]["posts"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Entries of `data.threads`.
    #[must_use]
    pub fn threads(&self) -> &[Value] {
        self.threads["data"]["threads"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The untouched `(posts, threads)` documents.
    #[must_use]
    pub fn into_raw(self) -> (Value, Value) {
        (self.posts, self.threads)
    }
}

/// Render a JSON id (string or number) as a string.
#[must_use]
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_institutions() -> Value {
        json!({
            "data": {
                "institutions": [
                    {
                        "institutionCode": "280001",
                        "institutionProfileId": 1001,
                        "children": [{"id": 501, "name": "Ida"}]
                    },
                    {
                        "institutionCode": "280002",
                        "institutionProfileId": 1002,
                        "children": [{"id": 502, "name": "Oskar"}]
                    }
                ]
            }
        })
    }

    #[test]
    fn profile_context_collects_children_and_profiles() {
        let context = ProfileContext::from_response(&two_institutions()).expect("context");

        assert_eq!(context.institution_codes, vec!["280001", "280002"]);
        assert_eq!(context.child_ids.len(), 2);
        assert_eq!(
            context.profile_and_child_ids(),
            vec!["1001", "1002", "501", "502"]
        );
    }

    #[test]
    fn profile_context_requires_institutions() {
        let err = ProfileContext::from_response(&json!({"data": {}})).expect_err("no institutions");
        assert!(matches!(
            err,
            CoreError::UnexpectedShape { ref path, .. } if path == "data.institutions"
        ));
    }

    #[test]
    fn broken_payload_reads_as_empty_without_losing_the_other() {
        let posts = json!({"data": {"posts": [{"id": 1}]}});
        let payloads = PortalPayloads::new(posts.clone(), json!({"data": {"threads": []}}));
        assert_eq!(payloads.posts().len(), 1);
        assert!(payloads.threads().is_empty());
        assert!(payloads.malformed().is_empty());

        let payloads = PortalPayloads::new(posts, json!({"status": {"code": 448}}));
        assert_eq!(payloads.posts().len(), 1);
        assert!(payloads.threads().is_empty());
        let problems = payloads.malformed();
        assert_eq!(problems.len(), 1);
        assert!(matches!(
            problems[0],
            CoreError::UnexpectedShape { ref method, ref path }
                if method == "messaging.getThreads" && path == "data.threads"
        ));
    }

    #[test]
    fn actor_values_match_portal_constants() {
        assert_eq!(ActorRole::Contact.form_value(), "KONTAKT");
        assert_eq!(ActorRole::Employee.form_value(), "MEDARBEJDER_EKSTERN");
        assert_eq!(PortalRole::Guardian.as_str(), "guardian");
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("anna", "secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("anna"));
        assert!(!debug.contains("secret"));
    }
}
