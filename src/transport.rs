use crate::client::create_rest_client;
use crate::error::Result;
use crate::request::{RequestBody, RequestDescriptor};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Raw response as handed back by a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Anything able to send a [`RequestDescriptor`] over HTTP.
///
/// Network failures are errors; every HTTP status, including 4xx and 5xx, is a
/// response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse>;
}

/// Default transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Transport over the default pooled client
    pub fn new() -> Result<Self> {
        Ok(ReqwestTransport {
            client: create_rest_client()?,
        })
    }

    /// Transport over a caller-supplied client (proxy, TLS, connection pool settings)
    pub fn with_client(client: Client) -> Self {
        ReqwestTransport { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse> {
        let url = request.full_url()?;
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(request.timeout);

        let multipart = matches!(request.body, RequestBody::Multipart { .. });
        for (name, value) in &request.headers {
            // reqwest writes the multipart content type itself, boundary included
            if multipart && name == "content-type" {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(serde_json::to_vec(value)?),
            RequestBody::Form(encoded) => builder.body(encoded.clone()),
            RequestBody::Multipart { fields, files } => {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                for (name, file) in files {
                    let mut part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
                    if let Some(ref content_type) = file.content_type {
                        part = part.mime_str(content_type)?;
                    }
                    form = form.part(name.clone(), part);
                }
                builder.multipart(form)
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse { status, headers, body })
    }
}
