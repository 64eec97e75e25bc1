//! Aula portal client: form-driven login followed by JSON API calls.

pub mod auth;
pub mod fetch;
pub mod form;
pub mod models;
pub mod session;

pub use auth::{AuthenticatedSession, Authenticator, LoginOutcome, LoginPage, LoginState};
pub use fetch::DataFetcher;
pub use form::LoginForm;
pub use models::{ActorRole, Credentials, PortalPayloads, PortalRole, ProfileContext, id_string};
pub use session::PortalSession;
