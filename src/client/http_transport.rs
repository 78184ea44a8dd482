//! [`EventServiceTransport`] over HTTP with `reqwest`.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::transport::{ChunkStream, EventServiceTransport};
use crate::api::dto::{
    FilterRequest, InitResponse, PublishEventRequest, RegisterRequest, UnregisterAllRequest,
    UnregisterRequest,
};
use crate::codec::{ListenResponse, WireDomainEvent};
use crate::config::ConnectionStrategy;
use crate::connection::SESSION_ID_HEADER;
use crate::domain::EventFilterSpec;
use crate::error::{ErrorResponse, EventServiceError};

/// HTTP transport talking to the `/eventservice` routes.
///
/// No request timeout is set by default: a listen call legitimately takes up
/// to the server's maximum waiting time.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    session_id: Option<String>,
    streaming: bool,
    identity: Arc<OnceLock<(String, String)>>,
}

impl HttpTransport {
    /// Creates a transport for the service mounted at `base_url`, e.g.
    /// `http://localhost:3000/eventservice`.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Configuration`] if the URL is invalid or
    /// cannot carry a path.
    pub fn new(base_url: &str) -> Result<Self, EventServiceError> {
        let base = Url::parse(base_url)
            .map_err(|e| EventServiceError::Configuration(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(EventServiceError::Configuration(format!(
                "{base_url} cannot be a base URL"
            )));
        }
        Ok(Self {
            client: Client::new(),
            base,
            session_id: None,
            streaming: true,
            identity: Arc::new(OnceLock::new()),
        })
    }

    /// Uses a preconfigured client, e.g. with proxy or TLS settings.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Sends the host's session id on init, for servers using session ids.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Declares whether long-lived responses survive the network path.
    /// Without streaming the connector falls back to polling.
    #[must_use]
    pub const fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, EventServiceError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| EventServiceError::Configuration(format!("{} has no path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn identified(&self, request: RequestBuilder) -> Result<RequestBuilder, EventServiceError> {
        let (header, id) = self
            .identity
            .get()
            .ok_or_else(|| EventServiceError::InvalidRequest("transport not initialized".to_string()))?;
        Ok(request.header(header.as_str(), id.as_str()))
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Response, EventServiceError> {
        let request = self.identified(self.client.post(self.url(&[path])?).json(body))?;
        check(request.send().await.map_err(transport_error)?).await
    }

    async fn get(&self, url: Url) -> Result<Response, EventServiceError> {
        let request = self.identified(self.client.get(url))?;
        check(request.send().await.map_err(transport_error)?).await
    }

    fn listen_url(&self, strategy: ConnectionStrategy) -> Result<Url, EventServiceError> {
        let mut url = self.url(&["listen"])?;
        url.query_pairs_mut().append_pair("strategy", strategy.as_str());
        Ok(url)
    }
}

async fn json<T: DeserializeOwned>(response: Response) -> Result<T, EventServiceError> {
    response.json().await.map_err(transport_error)
}

/// Maps failures without a usable response.
fn transport_error(err: reqwest::Error) -> EventServiceError {
    if err.is_decode() {
        EventServiceError::Serialization(err.to_string())
    } else if err.is_builder() || err.is_connect() {
        EventServiceError::FatalTransport(err.to_string())
    } else {
        EventServiceError::TransientTransport(err.to_string())
    }
}

/// Maps error responses.
async fn check(response: Response) -> Result<Response, EventServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.json::<ErrorResponse>().await.ok().map(|r| r.error);
    let error = if status == StatusCode::GONE {
        EventServiceError::UnknownUser(body.map_or_else(|| status.to_string(), |b| b.message))
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        EventServiceError::TransientTransport(format!("status {status}"))
    } else if let Some(body) = body {
        EventServiceError::from_body(body)
    } else {
        EventServiceError::FatalTransport(format!("unexpected status {status}"))
    };
    Err(error)
}

#[async_trait]
impl EventServiceTransport for HttpTransport {
    async fn init(&self) -> Result<InitResponse, EventServiceError> {
        let mut request = self.client.post(self.url(&["init"])?);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_ID_HEADER, session_id.as_str());
        }
        let response = check(request.send().await.map_err(transport_error)?).await?;
        let init: InitResponse = json(response).await?;
        let _ = self
            .identity
            .set((init.connection_header.clone(), init.connection_id.clone()));
        Ok(init)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn register(
        &self,
        domain: &str,
        filter: Option<&EventFilterSpec>,
    ) -> Result<(), EventServiceError> {
        let body = RegisterRequest {
            domain: domain.to_string(),
            filter: filter.cloned(),
        };
        self.post("register", &body).await.map(drop)
    }

    async fn unregister(&self, domains: &[String]) -> Result<(), EventServiceError> {
        match domains {
            [] => Ok(()),
            [domain] => {
                let body = UnregisterRequest {
                    domain: domain.clone(),
                };
                self.post("unregister", &body).await.map(drop)
            }
            _ => {
                let body = UnregisterAllRequest {
                    domains: Some(domains.to_vec()),
                };
                self.post("unregister-all", &body).await.map(drop)
            }
        }
    }

    async fn unregister_all(&self) -> Result<(), EventServiceError> {
        self.post("unregister-all", &UnregisterAllRequest::default())
            .await
            .map(drop)
    }

    async fn register_filter(
        &self,
        domain: &str,
        filter: &EventFilterSpec,
    ) -> Result<(), EventServiceError> {
        let body = FilterRequest {
            domain: domain.to_string(),
            filter: filter.clone(),
        };
        self.post("filter", &body).await.map(drop)
    }

    async fn deregister_filter(&self, domain: &str) -> Result<(), EventServiceError> {
        let request = self.identified(self.client.delete(self.url(&["filter", domain])?))?;
        check(request.send().await.map_err(transport_error)?)
            .await
            .map(drop)
    }

    async fn listen_polling(&self) -> Result<ListenResponse, EventServiceError> {
        let response = self.get(self.listen_url(ConnectionStrategy::Polling)?).await?;
        json(response).await
    }

    async fn listen_streaming(&self) -> Result<ChunkStream, EventServiceError> {
        let response = self.get(self.listen_url(ConnectionStrategy::Streaming)?).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(transport_error))
            .boxed())
    }

    async fn send_event(&self, event: WireDomainEvent) -> Result<(), EventServiceError> {
        let body = PublishEventRequest {
            domain: event.domain,
            event_type: event.event_type,
            data: event.data,
            user_id: None,
        };
        self.post("events", &body).await.map(drop)
    }
}
