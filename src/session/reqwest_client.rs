//! Reqwest-based implementation of the [`UpstreamClient`] trait.
//!
//! Logins run on a throwaway client with its own cookie jar so every
//! attempt starts from a clean slate; the resulting cookies are copied into
//! a [`SessionToken`] which the API client replays explicitly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, LOCATION, USER_AGENT};
use reqwest::{Client, redirect::Policy};
use serde::Deserialize;
use url::Url;

use super::client::{RawPayload, SessionToken, UpstreamClient, UpstreamFailure};
use super::detectors::{
    LoginVerdict, ResponseView, SessionSignal, classify_login, detect_session_signal,
};
use crate::config::{Credentials, NoiseTarget};
use crate::error::AgentResult;
use crate::profile::ProfileId;

const DEFAULT_BASE_URL: &str = "https://www.linkedin.com";
const AUTH_PATH: &str = "/uas/authenticate";
const API_PREFIX: &str = "/voyager/api";
const SESSION_COOKIE: &str = "JSESSIONID";
const DETAIL_LIMIT: usize = 256;
const POSTS_COUNT: &str = "10";

const AUTH_USER_AGENT: &str = "LinkedIn/8.8.1 CFNetwork/711.3.18 Darwin/14.0.0";
const AUTH_LI_USER_AGENT: &str = "LIAuthLibrary:3.2.4 com.linkedin.LinkedIn:8.8.1 iPhone:8.3";
const API_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Reqwest-backed upstream client.
pub struct ReqwestUpstreamClient {
    base_url: Url,
    api: Client,
    timeout: Duration,
}

impl ReqwestUpstreamClient {
    pub fn new() -> AgentResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Points the client at another host, mainly for staging mirrors.
    pub fn with_base_url(base_url: &str) -> AgentResult<Self> {
        let timeout = Duration::from_secs(30);
        let api = Client::builder()
            .redirect(Policy::none())
            .default_headers(api_headers())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: Url::parse(base_url)?,
            api,
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamFailure> {
        self.base_url
            .join(path)
            .map_err(|err| UpstreamFailure::Transport(format!("invalid endpoint {path}: {err}")))
    }

    fn auth_client(&self, jar: Arc<Jar>) -> Result<Client, UpstreamFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(AUTH_USER_AGENT));
        headers.insert("x-li-user-agent", HeaderValue::from_static(AUTH_LI_USER_AGENT));
        headers.insert("x-user-language", HeaderValue::from_static("en"));
        headers.insert("x-user-locale", HeaderValue::from_static("en_US"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-us"));

        Ok(Client::builder()
            .redirect(Policy::none())
            .cookie_provider(jar)
            .default_headers(headers)
            .timeout(self.timeout)
            .build()?)
    }

    fn session_headers(session: &SessionToken) -> Result<HeaderMap, UpstreamFailure> {
        let mut headers = HeaderMap::new();
        let cookie = HeaderValue::from_str(session.cookie_header())
            .map_err(|_| UpstreamFailure::Transport("session cookie is not a valid header".into()))?;
        let csrf = HeaderValue::from_str(session.csrf_token())
            .map_err(|_| UpstreamFailure::Transport("csrf token is not a valid header".into()))?;
        headers.insert(COOKIE, cookie);
        headers.insert("csrf-token", csrf);
        Ok(headers)
    }

    async fn api_get(
        &self,
        session: &SessionToken,
        path: &str,
        query: &[(String, String)],
    ) -> Result<(u16, Option<String>, String), UpstreamFailure> {
        let url = self.endpoint(&format!("{API_PREFIX}{path}"))?;
        let response = self
            .api
            .get(url)
            .headers(Self::session_headers(session)?)
            .query(query)
            .send()
            .await?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        Ok((status, location, body))
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn login(&self, credentials: &Credentials) -> Result<SessionToken, UpstreamFailure> {
        let (Some(username), Some(password)) = (credentials.username(), credentials.password())
        else {
            return Err(UpstreamFailure::BadCredentials("credentials not provided".into()));
        };

        let jar = Arc::new(Jar::default());
        let client = self.auth_client(jar.clone())?;
        let auth_url = self.endpoint(AUTH_PATH)?;

        // Seeds the JSESSIONID cookie the login form must echo back.
        let _ = client.get(auth_url.clone()).send().await?;
        let jsession = read_cookie(&jar, &self.base_url, SESSION_COOKIE).ok_or_else(|| {
            UpstreamFailure::UnexpectedShape("no JSESSIONID cookie issued before login".into())
        })?;

        let form = [
            ("session_key", username),
            ("session_password", password),
            ("JSESSIONID", jsession.as_str()),
        ];
        let response = client.post(auth_url).form(&form).send().await?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        match classify_login(&ResponseView::new(status, location.as_deref(), &body)) {
            LoginVerdict::Pass => {}
            LoginVerdict::Challenge { url } => return Err(UpstreamFailure::Challenge { url }),
            LoginVerdict::Rejected { reason } => return Err(UpstreamFailure::BadCredentials(reason)),
            LoginVerdict::Unexpected { detail } => return Err(UpstreamFailure::UnexpectedShape(detail)),
        }

        let cookie_header = jar
            .cookies(&self.base_url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
            .ok_or_else(|| UpstreamFailure::UnexpectedShape("login returned no cookies".into()))?;
        let csrf = read_cookie(&jar, &self.base_url, SESSION_COOKIE).unwrap_or(jsession);

        Ok(SessionToken::new(cookie_header, csrf.trim_matches('"')))
    }

    async fn fetch_profile(
        &self,
        session: &SessionToken,
        id: &ProfileId,
    ) -> Result<RawPayload, UpstreamFailure> {
        let path = format!("/identity/profiles/{}/profileView", id.as_str());
        let (status, location, body) = self.api_get(session, &path, &[]).await?;
        classify_response(status, location.as_deref(), &body)?;

        if let Ok(envelope) = serde_json::from_str::<StatusEnvelope>(&body)
            && let Some(inner) = envelope.status
            && inner != 200
        {
            return Err(UpstreamFailure::Status {
                status: inner,
                detail: format!("profile `{}` not available", id.as_str()),
            });
        }

        Ok(RawPayload::new(status, body))
    }

    async fn fetch_posts(
        &self,
        session: &SessionToken,
        profile_urn: &str,
    ) -> Result<RawPayload, UpstreamFailure> {
        let query = posts_query(profile_urn);
        let (status, location, body) = self
            .api_get(session, "/identity/profileUpdatesV2", &query)
            .await?;
        classify_response(status, location.as_deref(), &body)?;
        Ok(RawPayload::new(status, body))
    }

    async fn send_noise(
        &self,
        session: &SessionToken,
        target: &NoiseTarget,
    ) -> Result<(), UpstreamFailure> {
        let (status, location, body) = self.api_get(session, &target.path, &target.query).await?;
        classify_response(status, location.as_deref(), &body)
    }
}

/// Maps a non-login API response to a failure, if it is one.
fn classify_response(status: u16, location: Option<&str>, body: &str) -> Result<(), UpstreamFailure> {
    let view = ResponseView::new(status, location, body);
    if let Some(detection) = detect_session_signal(&view) {
        return Err(match detection.signal {
            SessionSignal::Expired => UpstreamFailure::LoginRedirect(detection.pattern_id.into()),
            SessionSignal::Checkpoint => UpstreamFailure::Challenge {
                url: location.map(str::to_string),
            },
        });
    }
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(UpstreamFailure::Status {
        status,
        detail: truncate(body, DETAIL_LIMIT),
    })
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: Option<u16>,
}

/// The member share feed is keyed by the `fsd_profile` form of the URN.
fn posts_query(profile_urn: &str) -> Vec<(String, String)> {
    [
        ("count", POSTS_COUNT),
        ("start", "0"),
        ("q", "memberShareFeed"),
        ("moduleKey", "member-shares:phone"),
        ("includeLongTermHistory", "true"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .chain([(
        "profileUrn".to_string(),
        profile_urn.replace("fs_miniProfile", "fsd_profile"),
    )])
    .collect()
}

fn read_cookie(jar: &Jar, url: &Url, name: &str) -> Option<String> {
    let header = jar.cookies(url)?;
    let raw = header.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn api_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(API_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert("x-restli-protocol-version", HeaderValue::from_static("2.0.0"));
    headers
}

fn truncate(body: &str, limit: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
