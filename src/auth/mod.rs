//! Access control: actions, the capability registry and the per-route authentication gate.

mod actions;
mod gate;

pub use actions::{AccessAction, AuthAction, AuthActionRegistry};
pub use gate::{
    bearer_token, require_auth, AccessToken, AuthGate, AuthRequirement, Principal, PrincipalResolver,
    StaticTokenResolver,
};
