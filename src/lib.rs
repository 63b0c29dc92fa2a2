//! cbl-auth: code-based-linking authorization for headless devices.
//!
//! A [`auth::CblAuthorizationProvider`] obtains a short user code from the
//! identity provider, waits for the user to enter it on another device, and
//! then keeps the resulting access token refreshed in the background.
//! Storage, notifications and exclusivity are delegated to an
//! [`auth::AuthorizationListener`] and an [`auth::AuthorizationManager`].

pub mod auth;
pub mod config;
pub mod error;
pub mod util;

pub use auth::{AuthorizationListener, AuthorizationManager, AuthorizationState, CblAuthorizationProvider};
pub use config::CblConfig;
pub use error::{CblError, Result};
