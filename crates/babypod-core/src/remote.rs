//! Network-facing seams: the Baby Buddy API, the time service, and the link.

use crate::{
    queue::{Action, IdempotencyKey, Resource},
    time::Timestamp,
    tracking::FeedingSummary,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectivityError {
    /// The link, DNS, or TCP connect failed.
    Unreachable,
    Timeout,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApiError {
    Network(ConnectivityError),
    /// HTTP 401 or 403.
    AuthFailed,
    /// Any other 4xx; resending the same request will not help.
    Validation { status: u16 },
    /// 5xx.
    ServerError { status: u16 },
}

impl ApiError {
    /// Maps a non-2xx HTTP status.
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthFailed,
            500..=599 => Self::ServerError { status },
            _ => Self::Validation { status },
        }
    }
}

impl From<ConnectivityError> for ApiError {
    fn from(err: ConnectivityError) -> Self {
        Self::Network(err)
    }
}

/// HTTP verb for an [`Action`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub const fn for_action(action: Action) -> Self {
        match action {
            Action::Create => Self::Post,
            Action::Update { .. } => Self::Patch,
            Action::Delete { .. } => Self::Delete,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// One mutating request against the Baby Buddy API.
#[derive(Clone, Copy, Debug)]
pub struct ApiCall<'a> {
    pub resource: Resource,
    pub action: Action,
    pub payload: &'a [u8],
    /// Replayed records carry their key so the server may dedupe.
    pub idempotency_key: Option<IdempotencyKey>,
    pub timeout_ms: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResponseSummary {
    pub status: u16,
    /// `id` of the created or updated object, when the body carried one.
    pub object_id: Option<u32>,
}

#[allow(async_fn_in_trait)]
pub trait RemoteApi {
    async fn call(&mut self, call: ApiCall<'_>) -> Result<ResponseSummary, ApiError>;

    /// Most recent feeding on the server, if any.
    async fn last_feeding(&mut self, timeout_ms: u32) -> Result<Option<FeedingSummary>, ApiError>;
}

#[allow(async_fn_in_trait)]
pub trait TimeSource {
    /// Current local time with its UTC offset.
    async fn fetch_authoritative_time(
        &mut self,
        timeout_ms: u32,
    ) -> Result<Timestamp, ConnectivityError>;
}

#[allow(async_fn_in_trait)]
pub trait Network {
    async fn connect(&mut self, timeout_ms: u32) -> Result<(), ConnectivityError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ApiError::from_status(401), ApiError::AuthFailed);
        assert_eq!(ApiError::from_status(403), ApiError::AuthFailed);
        assert_eq!(
            ApiError::from_status(400),
            ApiError::Validation { status: 400 }
        );
        assert_eq!(
            ApiError::from_status(503),
            ApiError::ServerError { status: 503 }
        );
    }

    #[test]
    fn actions_map_to_verbs() {
        assert_eq!(Method::for_action(Action::Create), Method::Post);
        assert_eq!(Method::for_action(Action::Update { id: 1 }), Method::Patch);
        assert_eq!(Method::for_action(Action::Delete { id: 1 }).as_str(), "DELETE");
    }
}
