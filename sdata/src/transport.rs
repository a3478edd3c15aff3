use crate::config::SDataConfig;
use crate::error::{SDataError, SDataResult};
use async_trait::async_trait;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
    /// `Some("")` sends an empty `If-Match` header.
    pub if_match: Option<String>,
    pub accept: String,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>, accept: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            if_match: None,
            accept: accept.into(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_if_match(mut self, token: impl Into<String>) -> Self {
        self.if_match = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            etag: None,
            body: body.into(),
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one HTTP exchange. Non-success statuses are returned as responses,
/// not errors; only failures to complete the exchange are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> SDataResult<HttpResponse>;

    fn transport_name(&self) -> &'static str;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl ReqwestTransport {
    pub fn new(config: &SDataConfig) -> SDataResult<Self> {
        config
            .validate()
            .map_err(|message| SDataError::InvalidConfig { message })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SDataError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            credentials: config
                .credentials
                .as_ref()
                .map(|c| (c.user.clone(), c.password.clone())),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> SDataResult<HttpResponse> {
        debug!("{} {}", request.method, request.url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
            Method::Delete => self.client.delete(&request.url),
        }
        .header(reqwest::header::ACCEPT, &request.accept);

        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(token) = &request.if_match {
            builder = builder.header(reqwest::header::IF_MATCH, token);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, &request.accept)
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse { status, etag, body })
    }

    fn transport_name(&self) -> &'static str {
        "reqwest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::new(Method::Put, "https://x/-/c('1')", "application/json")
            .with_if_match("")
            .with_body(b"{}".to_vec());
        assert_eq!(request.if_match.as_deref(), Some(""));
        assert_eq!(request.body.as_deref(), Some(&b"{}"[..]));
        assert_eq!(request.method.to_string(), "PUT");
    }

    #[test]
    fn test_response_status_classes() {
        assert!(HttpResponse::new(201, "").is_success());
        assert!(!HttpResponse::new(412, "stale").is_success());
        assert_eq!(HttpResponse::new(500, "boom").body_text(), "boom");
    }

    #[test]
    fn test_reqwest_transport_rejects_invalid_config() {
        let config = SDataConfig::new().with_base_url("ftp://x");
        assert!(matches!(
            ReqwestTransport::new(&config),
            Err(SDataError::InvalidConfig { .. })
        ));
    }
}
