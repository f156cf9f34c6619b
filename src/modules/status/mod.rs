//! Startup and status reporting.
//!
//! Holds the outcome of the first authentication attempt for the life of the
//! process, so later requests can point at the original cause.

use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CredentialPresence;
use crate::error::ErrorRecord;

/// Status snapshot consumed by the health surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub initialized: bool,
    pub initialization_error: Option<ErrorRecord>,
    pub credentials_present: CredentialPresence,
    pub last_request_error: Option<ErrorRecord>,
    pub started_at: DateTime<Utc>,
}

/// Body of `GET /api/startup-info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartupInfo {
    pub linkedin_agent_initialized: bool,
    pub initialization_error: Option<String>,
    pub environment_variables: CredentialPresence,
}

#[derive(Debug)]
pub struct StatusReporter {
    presence: CredentialPresence,
    started_at: DateTime<Utc>,
    initialization: OnceLock<Result<(), ErrorRecord>>,
    last_request_error: Mutex<Option<ErrorRecord>>,
}

impl StatusReporter {
    pub fn new(presence: CredentialPresence) -> Self {
        Self {
            presence,
            started_at: Utc::now(),
            initialization: OnceLock::new(),
            last_request_error: Mutex::new(None),
        }
    }

    /// Stores the first authentication outcome. Later calls are ignored and
    /// return `false`.
    pub fn record_initialization_outcome(&self, outcome: Result<(), ErrorRecord>) -> bool {
        match self.initialization.set(outcome) {
            Ok(()) => true,
            Err(ignored) => {
                log::debug!("initialization outcome already recorded, ignoring {ignored:?}");
                false
            }
        }
    }

    pub fn initialization_outcome(&self) -> Option<&Result<(), ErrorRecord>> {
        self.initialization.get()
    }

    pub fn initialization_error(&self) -> Option<&ErrorRecord> {
        self.initialization.get().and_then(|outcome| outcome.as_ref().err())
    }

    pub fn record_request_error(&self, error: &ErrorRecord) {
        let mut guard = self.last_request_error.lock().expect("status lock poisoned");
        *guard = Some(error.clone());
    }

    pub fn get_status(&self) -> AgentStatus {
        AgentStatus {
            initialized: matches!(self.initialization.get(), Some(Ok(()))),
            initialization_error: self.initialization_error().cloned(),
            credentials_present: self.presence,
            last_request_error: self
                .last_request_error
                .lock()
                .expect("status lock poisoned")
                .clone(),
            started_at: self.started_at,
        }
    }

    pub fn startup_info(&self) -> StartupInfo {
        let status = self.get_status();
        StartupInfo {
            linkedin_agent_initialized: status.initialized,
            initialization_error: status.initialization_error.map(|e| e.message().to_string()),
            environment_variables: status.credentials_present,
        }
    }
}
