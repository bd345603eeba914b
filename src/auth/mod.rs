//! Session management and persisted credentials.
//!
//! [`Credentials`] binds a [`CredentialStore`] to one application id; [`Auth`] layers the
//! register/login/logout flows on top of it.

mod api;
mod credentials;
mod store;

pub use api::{Auth, AuthEvent, AuthListener, AuthStateSubscription, ResetPassword};
pub use credentials::{Credentials, AUTH_DATA_KEY, AUTH_TOKEN_EXPIRATION, AUTH_TOKEN_KEY};
pub use store::{CredentialStore, FileCredentialStore, InMemoryCredentialStore};
