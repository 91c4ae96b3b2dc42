//! Health probes.
//!
//! # Responsibilities
//! - Issue `GET <health_check_path>` against one instance
//! - Report exactly `200 OK` as healthy, anything else as a failure

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::resilience::DownstreamError;

/// Checks whether one instance is alive.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, instance: &Url, path: &str) -> Result<(), DownstreamError>;
}

/// Plain HTTP probe over a pooled hyper client.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, instance: &Url, path: &str) -> Result<(), DownstreamError> {
        let target = instance
            .join(path)
            .map_err(|e| DownstreamError::Network(format!("invalid health check url: {e}")))?;

        let request = Request::builder()
            .method(Method::GET)
            .uri(target.as_str())
            .header(header::USER_AGENT, "edge-gateway-health-check")
            .body(Body::empty())
            .map_err(|e| DownstreamError::Network(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| DownstreamError::Network(e.to_string()))?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(DownstreamError::Status(response.status().as_u16()))
        }
    }
}
