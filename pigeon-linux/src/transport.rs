//! Inbox service over HTTP.

use std::time::Duration;

use pigeon_core::{HostError, InboxEntry, ServiceDescription, Transport};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking client; calls run on the worker thread.
pub struct HttpTransport {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base: Url::parse(base)?,
            token,
        })
    }

    /// Base URL with `segments` appended, each percent-encoded as a single segment.
    fn url(&self, segments: &[&str]) -> Result<Url, HostError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| HostError::Transport(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, HostError> {
        let req = match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        };
        req.send()
            .and_then(Response::error_for_status)
            .map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> HostError {
    HostError::Transport(e.to_string())
}

impl Transport for HttpTransport {
    fn fetch_inbox(&mut self, cursor: Option<&str>) -> Result<Vec<InboxEntry>, HostError> {
        let mut url = self.url(&["inbox"])?;
        if let Some(c) = cursor {
            url.query_pairs_mut().append_pair("after", c);
        }
        let entries: Vec<InboxEntry> = self
            .send(self.client.get(url))?
            .json()
            .map_err(transport_error)?;
        debug!(count = entries.len(), "inbox response");
        Ok(entries)
    }

    fn send_ack(&mut self, cursors: &[String]) -> Result<(), HostError> {
        self.send(self.client.post(self.url(&["ack"])?).json(cursors))?;
        Ok(())
    }

    fn send_envelope(&mut self, bytes: &[u8]) -> Result<(), HostError> {
        let req = self
            .client
            .post(self.url(&["message"])?)
            .header(CONTENT_TYPE, "application/x-protobuf")
            .body(bytes.to_vec());
        self.send(req)?;
        Ok(())
    }

    fn register_key(&mut self, public_key: &[u8]) -> Result<(), HostError> {
        let req = self
            .client
            .post(self.url(&["me", "associated-keys"])?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(public_key.to_vec());
        self.send(req)?;
        Ok(())
    }

    fn fetch_service(&mut self, name: &str) -> Result<ServiceDescription, HostError> {
        self.send(self.client.get(self.url(&["external", "service", name])?))?
            .json()
            .map_err(transport_error)
    }
}
