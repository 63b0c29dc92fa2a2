//! Code-based-linking (OAuth device authorization) flow.

pub mod device_code;
pub mod error;
mod flow;
pub mod listener;
pub mod provider;
pub mod token;
pub mod transport;

pub use error::{AuthorizationErrorReason, ErrorBand, ErrorCode};
pub use listener::{
    AuthorizationEvent, AuthorizationListener, AuthorizationManager, AuthorizationState,
    StartAuthorizationResult, REFRESH_TOKEN_KEY,
};
pub use provider::{CblAuthorizationProvider, DEFAULT_SERVICE};
pub use token::{AuthState, CodePair, TokenState};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
