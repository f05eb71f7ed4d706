//! Baby Buddy REST client and time-service client over `reqwless`.

use core::fmt::Write as _;

use babypod_core::{
    queue::IdempotencyKey,
    remote::{
        ApiCall, ApiError, ConnectivityError, Method, Network, RemoteApi, ResponseSummary,
        TimeSource,
    },
    time::{Timestamp, parse_timestamp},
    tracking::{FeedingSummary, created_id},
};
use embassy_net::{
    Stack,
    dns::DnsSocket,
    tcp::client::{TcpClient, TcpClientState},
};
use embassy_time::{Duration, WithTimeout};
use heapless::{String, Vec};
use log::{debug, info, warn};
use reqwless::{
    client::HttpClient,
    headers::ContentType,
    request::{Method as HttpMethod, RequestBuilder},
};

use super::ConnectivityHandle;

const SOCKET_BYTES: usize = 1024;
const RX_BYTES: usize = 4096;
const BODY_BYTES: usize = 2048;

/// One connection at a time; the engine never overlaps requests.
pub type HttpState = TcpClientState<1, SOCKET_BYTES, SOCKET_BYTES>;

type Url = String<256>;
type HeaderValue = String<96>;
type Body = Vec<u8, BODY_BYTES>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiConfig {
    pub host: &'static str,
    pub port: u16,
    /// Prefix in front of every resource, e.g. `/api`.
    pub path: &'static str,
    pub token: &'static str,
    pub child_id: u32,
    /// Prefixes idempotency keys so devices sharing a server never collide.
    pub device: &'static str,
}

/// Endpoint answering a GET with an ISO-8601 local time and offset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeConfig {
    pub host: &'static str,
    pub port: u16,
    pub path: &'static str,
}

/// Baby Buddy client doubling as the engine's [`Network`] and [`TimeSource`].
pub struct BabyBuddyClient<'a> {
    stack: Stack<'a>,
    tcp: TcpClient<'a, 1, SOCKET_BYTES, SOCKET_BYTES>,
    dns: DnsSocket<'a>,
    connectivity: &'a ConnectivityHandle,
    api: ApiConfig,
    time: TimeConfig,
    rx: [u8; RX_BYTES],
    body: Body,
}

impl<'a> BabyBuddyClient<'a> {
    pub fn new(
        stack: Stack<'a>,
        state: &'a HttpState,
        connectivity: &'a ConnectivityHandle,
        api: ApiConfig,
        time: TimeConfig,
    ) -> Self {
        Self {
            stack,
            tcp: TcpClient::new(stack, state),
            dns: DnsSocket::new(stack),
            connectivity,
            api,
            time,
            rx: [0; RX_BYTES],
            body: Body::new(),
        }
    }

    /// Sends one request and leaves the decoded body in `self.body`.
    async fn request(
        &mut self,
        method: HttpMethod,
        url: &str,
        headers: &[(&str, &str)],
        payload: &[u8],
        timeout_ms: u32,
    ) -> Result<u16, ConnectivityError> {
        self.body.clear();
        let exchanged = exchange(
            &self.tcp,
            &self.dns,
            &mut self.rx,
            &mut self.body,
            method,
            url,
            headers,
            payload,
        )
        .with_timeout(Duration::from_millis(u64::from(timeout_ms)))
        .await;
        let result = match exchanged {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(err)) => {
                warn!("http: request failed url={} err={:?}", url, err);
                Err(ConnectivityError::Unreachable)
            }
            Err(_) => {
                warn!("http: request timed out url={} after_ms={}", url, timeout_ms);
                Err(ConnectivityError::Timeout)
            }
        };
        self.connectivity.update_api(result.is_ok());
        result
    }

    fn api_url(
        &self,
        endpoint: &str,
        object_id: Option<u32>,
        query: Option<(&str, u32)>,
    ) -> Result<Url, core::fmt::Error> {
        let mut url = Url::new();
        write!(
            url,
            "http://{}:{}{}/{}/",
            self.api.host, self.api.port, self.api.path, endpoint
        )?;
        if let Some(id) = object_id {
            write!(url, "{}/", id)?;
        }
        if let Some((key, value)) = query {
            write!(url, "?{}={}&child={}", key, value, self.api.child_id)?;
        }
        Ok(url)
    }

    fn authorization(&self) -> Result<HeaderValue, core::fmt::Error> {
        let mut value = HeaderValue::new();
        write!(value, "Token {}", self.api.token)?;
        Ok(value)
    }

    fn idempotency_value(&self, key: IdempotencyKey) -> Result<HeaderValue, core::fmt::Error> {
        let mut value = HeaderValue::new();
        write!(value, "{}-{}", self.api.device, key)?;
        Ok(value)
    }
}

#[allow(clippy::too_many_arguments)]
async fn exchange(
    tcp: &TcpClient<'_, 1, SOCKET_BYTES, SOCKET_BYTES>,
    dns: &DnsSocket<'_>,
    rx: &mut [u8],
    out: &mut Body,
    method: HttpMethod,
    url: &str,
    headers: &[(&str, &str)],
    payload: &[u8],
) -> Result<u16, reqwless::Error> {
    let mut client = HttpClient::new(tcp, dns);
    let mut request = client.request(method, url).await?.headers(headers).body(payload);
    if !payload.is_empty() {
        request = request.content_type(ContentType::ApplicationJson);
    }
    let response = request.send(rx).await?;
    let status = response.status.0;
    // Chunked and length-delimited bodies are both decoded here; an
    // oversized body is an error, never a silent truncation.
    let body = response.body().read_to_end().await?;
    out.extend_from_slice(body)
        .map_err(|()| reqwless::Error::BufferTooSmall)?;
    Ok(status)
}

const fn http_method(method: Method) -> HttpMethod {
    match method {
        Method::Get => HttpMethod::GET,
        Method::Post => HttpMethod::POST,
        Method::Patch => HttpMethod::PATCH,
        Method::Delete => HttpMethod::DELETE,
    }
}

fn success(status: u16) -> bool {
    (200..300).contains(&status)
}

impl RemoteApi for BabyBuddyClient<'_> {
    async fn call(&mut self, call: ApiCall<'_>) -> Result<ResponseSummary, ApiError> {
        let method = Method::for_action(call.action);
        let overflow = |_| {
            warn!("http: request line overflow resource={:?}", call.resource);
            ApiError::Validation { status: 0 }
        };
        let url = self
            .api_url(call.resource.endpoint(), call.action.object_id(), None)
            .map_err(overflow)?;
        let authorization = self.authorization().map_err(overflow)?;
        let idempotency = call
            .idempotency_key
            .map(|key| self.idempotency_value(key))
            .transpose()
            .map_err(overflow)?;

        let mut headers: Vec<(&str, &str), 3> = Vec::new();
        let _ = headers.push(("Authorization", authorization.as_str()));
        let _ = headers.push(("Accept", "application/json"));
        if let Some(value) = &idempotency {
            let _ = headers.push(("Idempotency-Key", value.as_str()));
        }

        let status = self
            .request(
                http_method(method),
                &url,
                &headers,
                call.payload,
                call.timeout_ms,
            )
            .await?;
        info!(
            "http: {} {} status={}",
            method.as_str(),
            call.resource.endpoint(),
            status
        );
        if !success(status) {
            return Err(ApiError::from_status(status));
        }
        Ok(ResponseSummary {
            status,
            object_id: created_id(&self.body),
        })
    }

    async fn last_feeding(&mut self, timeout_ms: u32) -> Result<Option<FeedingSummary>, ApiError> {
        let overflow = |_| ApiError::Validation { status: 0 };
        let url = self
            .api_url("feedings", None, Some(("limit", 1)))
            .map_err(overflow)?;
        let authorization = self.authorization().map_err(overflow)?;
        let headers = [
            ("Authorization", authorization.as_str()),
            ("Accept", "application/json"),
        ];
        let status = self
            .request(HttpMethod::GET, &url, &headers, &[], timeout_ms)
            .await?;
        if !success(status) {
            return Err(ApiError::from_status(status));
        }
        Ok(FeedingSummary::from_page(&self.body))
    }
}

impl TimeSource for BabyBuddyClient<'_> {
    async fn fetch_authoritative_time(
        &mut self,
        timeout_ms: u32,
    ) -> Result<Timestamp, ConnectivityError> {
        let mut url = Url::new();
        write!(
            url,
            "http://{}:{}{}",
            self.time.host, self.time.port, self.time.path
        )
        .map_err(|_| ConnectivityError::Unreachable)?;

        let status = self
            .request(HttpMethod::GET, &url, &[], &[], timeout_ms)
            .await?;
        let text = core::str::from_utf8(&self.body).unwrap_or_default();
        match parse_timestamp(text) {
            Some(now) if success(status) => {
                debug!("http: time service now={:?}", now);
                Ok(now)
            }
            _ => {
                warn!("http: time service unusable status={}", status);
                Err(ConnectivityError::Unreachable)
            }
        }
    }
}

impl Network for BabyBuddyClient<'_> {
    async fn connect(&mut self, timeout_ms: u32) -> Result<(), ConnectivityError> {
        self.connectivity.request_link(true);
        if self.stack.is_config_up() {
            return Ok(());
        }
        self.connectivity.mark_connecting();
        self.stack
            .wait_config_up()
            .with_timeout(Duration::from_millis(u64::from(timeout_ms)))
            .await
            .map_err(|_| {
                warn!("net: connect timed out after_ms={}", timeout_ms);
                ConnectivityError::Timeout
            })?;
        info!("net: connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        info!("net: disconnect requested");
        self.connectivity.request_link(false);
    }

    fn is_connected(&self) -> bool {
        self.connectivity.link_requested() && self.stack.is_config_up()
    }
}
