//! reqwest-backed hub transport.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tracing::debug;

use super::{HubRequest, HubResponse, HubTransport, RequestBody, TransportError};
use crate::error::Result;

#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("hubsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    fn classify(err: reqwest::Error, request: &HubRequest) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(request.timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::Request(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl HubTransport for ReqwestTransport {
    async fn send(&self, request: HubRequest) -> std::result::Result<HubResponse, TransportError> {
        let mut req = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(request.timeout);

        req = match &request.body {
            RequestBody::Empty => req,
            RequestBody::Json(body) => req.json(body),
            RequestBody::Multipart { fields, file } => {
                // Form is consumed by send, so each attempt rebuilds it.
                let mut form = Form::new();
                for (key, value) in fields {
                    form = form.text(key.clone(), value.clone());
                }
                let len = file.bytes.len() as u64;
                let part = Part::stream_with_length(Body::from(file.bytes.clone()), len)
                    .file_name(file.name.clone());
                req.multipart(form.part(file.name.clone(), part))
            }
        };

        let resp = req.send().await.map_err(|e| Self::classify(e, &request))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Self::classify(e, &request))?
            .to_vec();

        debug!(
            "{} {} -> {} ({} bytes)",
            request.method,
            request.url,
            status,
            body.len()
        );

        Ok(HubResponse {
            status,
            headers,
            body,
        })
    }
}
