//! High level agent orchestration.
//!
//! Wires configuration, the session manager, pacing, caching, and the fetch
//! pipeline into a single handle the serving layer can share.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::{AgentResult, ErrorRecord};
use crate::modules::cache::ProfileCache;
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler};
use crate::modules::pacing::PacingScheduler;
use crate::modules::queue::{QueueStatus, QueueTracker};
use crate::modules::status::{AgentStatus, StartupInfo, StatusReporter};
use crate::pipeline::{FetchPipeline, FetchResult};
use crate::profile::{ProfileParser, VoyagerProfileParser};
use crate::session::{ReqwestUpstreamClient, SessionManager, SessionState, UpstreamClient};

/// Fluent builder for [`LinkedInAgent`].
pub struct AgentBuilder {
	config: AgentConfig,
	client: Option<Arc<dyn UpstreamClient>>,
	parser: Option<Arc<dyn ProfileParser>>,
	handlers: Vec<Arc<dyn EventHandler>>,
	logging: bool,
}

impl AgentBuilder {
	pub fn new() -> Self {
		Self {
			config: AgentConfig::default(),
			client: None,
			parser: None,
			handlers: Vec::new(),
			logging: true,
		}
	}

	pub fn with_config(mut self, config: AgentConfig) -> Self {
		self.config = config;
		self
	}

	/// Replaces the reqwest transport, mostly for tests.
	pub fn with_client(mut self, client: Arc<dyn UpstreamClient>) -> Self {
		self.client = Some(client);
		self
	}

	pub fn with_parser(mut self, parser: Arc<dyn ProfileParser>) -> Self {
		self.parser = Some(parser);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_logging_handler(mut self) -> Self {
		self.logging = false;
		self
	}

	pub fn build(self) -> AgentResult<LinkedInAgent> {
		let client: Arc<dyn UpstreamClient> = match self.client {
			Some(client) => client,
			None => Arc::new(ReqwestUpstreamClient::new()?),
		};
		let parser: Arc<dyn ProfileParser> = self
			.parser
			.unwrap_or_else(|| Arc::new(VoyagerProfileParser::new()));

		let mut events = EventDispatcher::new();
		if self.logging {
			events.register_handler(Arc::new(LoggingHandler));
		}
		for handler in self.handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let config = Arc::new(self.config);
		let sessions = SessionManager::new(
			client.clone(),
			config.credentials.clone(),
			config.session,
			events.clone(),
		);
		let pacing = PacingScheduler::new(&config, events.clone());
		let cache = Arc::new(ProfileCache::new(config.cache));
		let queue = Arc::new(QueueTracker::new(&config));
		let reporter = Arc::new(StatusReporter::new(config.credential_presence()));

		let pipeline = FetchPipeline::new(
			client,
			sessions.clone(),
			pacing,
			parser,
			cache.clone(),
			queue.clone(),
			reporter.clone(),
			events,
		)
		.with_posts(config.posts_enabled);

		Ok(LinkedInAgent {
			config,
			sessions,
			pipeline,
			cache,
			queue,
			reporter,
		})
	}
}

impl Default for AgentBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Main agent handle. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct LinkedInAgent {
	config: Arc<AgentConfig>,
	sessions: SessionManager,
	pipeline: FetchPipeline,
	cache: Arc<ProfileCache>,
	queue: Arc<QueueTracker>,
	reporter: Arc<StatusReporter>,
}

impl LinkedInAgent {
	/// Construct an agent over the reqwest transport.
	pub fn new(config: AgentConfig) -> AgentResult<Self> {
		AgentBuilder::new().with_config(config).build()
	}

	pub fn builder() -> AgentBuilder {
		AgentBuilder::new()
	}

	/// Runs the first authentication attempt and records its outcome for the
	/// status surface. Calling it again returns the session's current
	/// outcome without logging in a second time.
	pub async fn initialize(&self) -> Result<(), ErrorRecord> {
		let outcome = self.sessions.authenticate().await;
		match &outcome {
			Ok(()) => log::info!("agent initialized"),
			Err(error) => log::error!("agent initialization failed: {error}"),
		}
		self.reporter.record_initialization_outcome(outcome.clone());
		outcome
	}

	pub async fn fetch_profile(&self, identifier: &str) -> FetchResult {
		self.pipeline.fetch_profile(identifier).await
	}

	pub fn status(&self) -> AgentStatus {
		self.reporter.get_status()
	}

	pub fn startup_info(&self) -> StartupInfo {
		self.reporter.startup_info()
	}

	pub fn queue_status(&self) -> QueueStatus {
		self.queue.status()
	}

	pub fn session_state(&self) -> SessionState {
		self.sessions.state()
	}

	pub fn config(&self) -> &AgentConfig {
		&self.config
	}

	pub fn cached_profiles(&self) -> usize {
		self.cache.len()
	}
}
