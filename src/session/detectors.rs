//! Response signature detection.
//!
//! Recognises the upstream's login outcomes and the signatures that tell an
//! expired session or an interactive checkpoint apart from ordinary errors.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Minimal view over an upstream response used by the detectors.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub status: u16,
    pub location: Option<&'a str>,
    pub body: &'a str,
}

impl<'a> ResponseView<'a> {
    pub fn new(status: u16, location: Option<&'a str>, body: &'a str) -> Self {
        Self {
            status,
            location,
            body,
        }
    }

    fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Session-level signals found in a non-login response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSignal {
    /// Cookies are no longer accepted; a fresh login is needed.
    Expired,
    /// Upstream parked the account behind an interactive checkpoint.
    Checkpoint,
}

/// Detection output.
#[derive(Debug, Clone)]
pub struct SignalDetection {
    pub pattern_id: &'static str,
    pub signal: SessionSignal,
    pub matched_indicator: String,
}

#[derive(Debug)]
enum Target {
    Location,
    Body,
}

#[derive(Debug)]
struct SignaturePattern {
    id: &'static str,
    signal: SessionSignal,
    target: Target,
    statuses: &'static [u16],
    regex: Regex,
}

impl SignaturePattern {
    fn new(
        id: &'static str,
        signal: SessionSignal,
        target: Target,
        statuses: &'static [u16],
        raw: &str,
    ) -> Self {
        Self {
            id,
            signal,
            target,
            statuses,
            regex: build_regex(raw),
        }
    }

    fn evaluate(&self, response: &ResponseView<'_>) -> Option<String> {
        if !self.statuses.is_empty() && !self.statuses.contains(&response.status) {
            return None;
        }
        let haystack = match self.target {
            Target::Location if response.is_redirect() => response.location?,
            Target::Location => return None,
            Target::Body => response.body,
        };
        self.regex
            .find(haystack)
            .map(|m| m.as_str().to_string())
    }
}

/// Checkpoint patterns come first so a redirect to a challenge is never
/// mistaken for a plain login redirect.
static KNOWN_SIGNATURES: Lazy<Vec<SignaturePattern>> = Lazy::new(|| {
    vec![
        SignaturePattern::new(
            "checkpoint_redirect",
            SessionSignal::Checkpoint,
            Target::Location,
            &[],
            r"/checkpoint/(?:challenge|lg/login-submit|rp)",
        ),
        SignaturePattern::new(
            "login_redirect",
            SessionSignal::Expired,
            Target::Location,
            &[],
            r"/(?:uas/)?login(?:[/?#]|$)|/authwall",
        ),
        SignaturePattern::new(
            "csrf_rejected",
            SessionSignal::Expired,
            Target::Body,
            &[401, 403],
            r"CSRF check failed",
        ),
        SignaturePattern::new(
            "unauthorized",
            SessionSignal::Expired,
            Target::Body,
            &[401],
            r".*",
        ),
    ]
});

/// Classifies non-login responses for session-level signals.
pub fn detect_session_signal(response: &ResponseView<'_>) -> Option<SignalDetection> {
    KNOWN_SIGNATURES.iter().find_map(|pattern| {
        pattern
            .evaluate(response)
            .map(|matched| SignalDetection {
                pattern_id: pattern.id,
                signal: pattern.signal,
                matched_indicator: matched,
            })
    })
}

/// Outcome of a login attempt as reported by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginVerdict {
    Pass,
    Challenge { url: Option<String> },
    Rejected { reason: String },
    Unexpected { detail: String },
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    login_result: Option<String>,
    challenge_url: Option<String>,
}

/// Interprets the login endpoint's response.
pub fn classify_login(response: &ResponseView<'_>) -> LoginVerdict {
    if let Some(detection) = detect_session_signal(response)
        && detection.signal == SessionSignal::Checkpoint
    {
        return LoginVerdict::Challenge {
            url: response.location.map(str::to_string),
        };
    }

    let parsed: Option<LoginBody> = serde_json::from_str(response.body).ok();
    let result = parsed
        .as_ref()
        .and_then(|body| body.login_result.as_deref())
        .map(str::to_ascii_uppercase);

    match result.as_deref() {
        Some("PASS") => LoginVerdict::Pass,
        Some("CHALLENGE") => LoginVerdict::Challenge {
            url: parsed.and_then(|body| body.challenge_url),
        },
        Some(reason) if BAD_CREDENTIALS.is_match(reason) => LoginVerdict::Rejected {
            reason: reason.to_string(),
        },
        Some(other) => LoginVerdict::Unexpected {
            detail: format!("login_result `{other}` (status {})", response.status),
        },
        None if response.status == 401 => LoginVerdict::Rejected {
            reason: "unauthorized".into(),
        },
        None => LoginVerdict::Unexpected {
            detail: format!(
                "login response without a login_result field (status {})",
                response.status
            ),
        },
    }
}

static BAD_CREDENTIALS: Lazy<Regex> =
    Lazy::new(|| build_regex(r"^(?:BAD_(?:USERNAME_OR_PASSWORD|PASSWORD|EMAIL|USERNAME)|INVALID_.*)$"));

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid session signature regex `{}`: {}", pattern, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_redirect_means_expired() {
        let response = ResponseView::new(302, Some("https://www.linkedin.com/login?session_redirect=x"), "");
        let detection = detect_session_signal(&response).expect("should detect");
        assert_eq!(detection.signal, SessionSignal::Expired);
        assert_eq!(detection.pattern_id, "login_redirect");
    }

    #[test]
    fn checkpoint_redirect_wins_over_login() {
        let response = ResponseView::new(
            303,
            Some("https://www.linkedin.com/checkpoint/challenge/AgF?login=1"),
            "",
        );
        let detection = detect_session_signal(&response).expect("should detect");
        assert_eq!(detection.signal, SessionSignal::Checkpoint);
    }

    #[test]
    fn csrf_failure_and_unauthorized() {
        let csrf = ResponseView::new(403, None, "CSRF check failed.");
        assert_eq!(
            detect_session_signal(&csrf).map(|d| d.signal),
            Some(SessionSignal::Expired)
        );
        let unauthorized = ResponseView::new(401, None, "");
        assert_eq!(
            detect_session_signal(&unauthorized).map(|d| d.pattern_id),
            Some("unauthorized")
        );
    }

    #[test]
    fn ordinary_errors_carry_no_signal() {
        assert!(detect_session_signal(&ResponseView::new(404, None, "not found")).is_none());
        assert!(detect_session_signal(&ResponseView::new(200, None, "{}")).is_none());
        assert!(detect_session_signal(&ResponseView::new(301, Some("/in/alice"), "")).is_none());
    }

    #[test]
    fn classifies_login_results() {
        let pass = ResponseView::new(200, None, r#"{"login_result":"PASS"}"#);
        assert_eq!(classify_login(&pass), LoginVerdict::Pass);

        let challenge = ResponseView::new(
            200,
            None,
            r#"{"login_result":"CHALLENGE","challenge_url":"https://www.linkedin.com/checkpoint/challenge/x"}"#,
        );
        assert!(matches!(
            classify_login(&challenge),
            LoginVerdict::Challenge { url: Some(_) }
        ));

        let bad = ResponseView::new(200, None, r#"{"login_result":"BAD_PASSWORD"}"#);
        assert!(matches!(classify_login(&bad), LoginVerdict::Rejected { .. }));

        let odd = ResponseView::new(500, None, "<html>oops</html>");
        assert!(matches!(classify_login(&odd), LoginVerdict::Unexpected { .. }));
    }
}
