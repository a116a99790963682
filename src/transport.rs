/*!
 * HTTP transport backing the connection manager
 */

use async_trait::async_trait;
use halo_core_resilience::{QueryError, QueryRequest, QueryResponse, QueryTransport};
use reqwest::Method;

/// [`QueryTransport`] implementation over reqwest.
///
/// No client-level timeout is set; the connection manager owns every
/// request's deadline. Connection-level failures surface as
/// [`QueryError::Network`], status handling stays in the scheduler.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn send(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| QueryError::Invalid(format!("bad method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;

        Ok(QueryResponse { status, body })
    }
}
