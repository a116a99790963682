/*!
 * The resilient query service: composition root over cache, connection
 * manager, and error handler
 *
 * `query` never fails. A cache hit answers immediately; a miss goes
 * through the connection manager with its deduplication, circuit
 * breakers, and retries; any terminal failure is captured into telemetry
 * and mapped to a human-readable fallback message.
 */

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use halo_core_cache::{CacheManager, SetOptions};
use halo_core_resilience::{ConnectionManager, QueryError, QueryRequest, QueryTransport};
use halo_core_telemetry::{ErrorContext, ErrorHandler, ErrorReport};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::transport::HttpTransport;

/// Shape of a successful backend response
#[derive(Debug, Deserialize)]
struct AnswerBody {
    text: String,
}

pub struct QueryService {
    config: ServiceConfig,
    cache: Arc<CacheManager>,
    connections: Arc<ConnectionManager>,
    errors: Arc<ErrorHandler>,
}

impl QueryService {
    /// Wire the service against the real HTTP transport
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    /// Wire the service against a caller-supplied transport
    pub fn with_transport(
        config: ServiceConfig,
        transport: Arc<dyn QueryTransport>,
    ) -> Result<Self> {
        let cache = CacheManager::new(config.cache_config())?;
        let connections = ConnectionManager::new(transport, config.connection_config());
        let errors = ErrorHandler::new(config.telemetry_config());

        // Memory-pressure recovery empties the cache
        let cache_for_hook = Arc::clone(&cache);
        errors.on_clear_caches(move || {
            let dropped = cache_for_hook.invalidate("*");
            tracing::info!(dropped, "cache cleared by recovery hook");
        });

        Ok(Self {
            config,
            cache,
            connections,
            errors,
        })
    }

    /// Answer a question. Resolves to either the backend's answer or a
    /// friendly fallback message; never an error.
    pub async fn query(&self, question: &str) -> String {
        let started = Instant::now();
        let key = answer_key(question);

        if let Some(answer) = self
            .cache
            .get::<String>(&key, CacheManager::DEFAULT_READ_LAYERS)
        {
            self.errors.record_timing_sample(started.elapsed());
            tracing::debug!(key = %key, "answered from cache");
            return answer;
        }

        let body = serde_json::json!({ "question": question }).to_string();
        let request = QueryRequest::post_json(&self.config.endpoint, body);

        match self.connections.fetch(request, 0).await {
            Ok(response) => match serde_json::from_str::<AnswerBody>(&response.body) {
                Ok(answer) => {
                    self.cache.set(
                        &key,
                        &answer.text,
                        SetOptions::default().with_ttl(std::time::Duration::from_secs(
                            self.config.answer_ttl_secs,
                        )),
                    );
                    self.errors.record_timing_sample(started.elapsed());
                    answer.text
                }
                Err(err) => {
                    let err = QueryError::Malformed(err.to_string());
                    self.capture_query_error(&err);
                    fallback_message(&err).to_string()
                }
            },
            Err(err) => {
                self.capture_query_error(&err);
                fallback_message(&err).to_string()
            }
        }
    }

    fn capture_query_error(&self, err: &QueryError) {
        self.errors.capture(ErrorReport::new(
            err.kind(),
            err.to_string(),
            ErrorContext::Query {
                url: self.config.endpoint.clone(),
                action: "query".to_string(),
            },
        ));
    }

    /// Feed the connectivity signal into recovery
    pub fn set_online(&self, online: bool) {
        self.errors.set_online(online);
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn errors(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }
}

/// Cache key for a question, normalized so casing and padding do not
/// fragment the cache
fn answer_key(question: &str) -> String {
    let normalized = question.trim().to_lowercase();
    let digest = blake3::hash(normalized.as_bytes()).to_hex();
    format!("faq:{}", &digest[..16])
}

/// Map a terminal query failure to the message shown to the user
pub fn fallback_message(err: &QueryError) -> &'static str {
    match err {
        QueryError::Timeout(_) | QueryError::Aborted => {
            "The request took too long. Please try again."
        }
        QueryError::Network(_) | QueryError::CircuitOpen { .. } => {
            "We're having trouble reaching the service. Check your connection and try again."
        }
        QueryError::RateLimited => {
            "You're sending requests a little too quickly. Please wait a moment and try again."
        }
        QueryError::Server { .. } => {
            "The service hit a problem on our end. Please try again shortly."
        }
        QueryError::Auth { .. } => "Your session has expired. Please sign in again.",
        _ => "Something went wrong. Please try again.",
    }
}
