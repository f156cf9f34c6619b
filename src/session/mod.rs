//! Upstream session handling: transport seam, response classification, and
//! the authenticated session state machine.

pub mod client;
pub mod detectors;
pub mod manager;
pub mod reqwest_client;

pub use client::{RawPayload, SessionToken, UpstreamClient, UpstreamFailure};
pub use detectors::{
    LoginVerdict, ResponseView, SessionSignal, SignalDetection, classify_login,
    detect_session_signal,
};
pub use manager::{SessionLease, SessionManager, SessionState, SessionStatus};
pub use reqwest_client::ReqwestUpstreamClient;
