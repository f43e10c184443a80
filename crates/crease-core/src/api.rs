// Request/response client for the scoring data service.
//
// Every endpoint answers with the `{ success, data?, message? }` envelope.
// The session talks to the service through the `MatchDataService` trait so
// tests can substitute an in-process fake.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::protocol::{ApiResponse, MatchStateDto, PlayerRef, TeamSide, TossRequest};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("server rejected {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },
    #[error("{endpoint} returned no data")]
    MissingData { endpoint: String },
    #[error("could not decode {endpoint} response: {source}")]
    Decode {
        endpoint: String,
        source: serde_json::Error,
    },
}

/// Operations the scoring session needs from the data service.
#[async_trait]
pub trait MatchDataService: Send + Sync {
    async fn fetch_match_state(&self, match_id: &str) -> Result<MatchStateDto, FetchError>;

    async fn undo_last_ball(&self, match_id: &str) -> Result<(), FetchError>;

    async fn submit_toss(&self, match_id: &str, toss: &TossRequest) -> Result<(), FetchError>;

    async fn select_next_batsman(&self, match_id: &str, player_id: &str)
        -> Result<(), FetchError>;

    async fn select_next_bowler(&self, match_id: &str, player_id: &str) -> Result<(), FetchError>;

    async fn start_second_innings(&self, match_id: &str) -> Result<(), FetchError>;

    async fn playing_xi(&self, match_id: &str, side: TeamSide)
        -> Result<Vec<PlayerRef>, FetchError>;

    async fn batting_available(&self, match_id: &str) -> Result<Vec<PlayerRef>, FetchError>;
}

// ---------------------------------------------------------------------------
// Endpoint paths
// ---------------------------------------------------------------------------

fn match_state_path(match_id: &str) -> String {
    format!("matchstate/{match_id}")
}

fn undo_path(match_id: &str) -> String {
    format!("{match_id}/undo-last-ball")
}

fn toss_path(match_id: &str) -> String {
    format!("{match_id}/toss")
}

fn next_batsman_path(match_id: &str, player_id: &str) -> String {
    format!("{match_id}/next-batsman/{player_id}")
}

fn next_bowler_path(match_id: &str, player_id: &str) -> String {
    format!("{match_id}/next-bowler/{player_id}")
}

fn start_second_innings_path(match_id: &str) -> String {
    format!("matches/{match_id}/start-second-innings")
}

fn playing_xi_path(match_id: &str, side: TeamSide) -> String {
    format!("{match_id}/playingXI/{}", side.path_segment())
}

fn batting_available_path(match_id: &str) -> String {
    format!("{match_id}/batting-available")
}

// ---------------------------------------------------------------------------
// Envelope handling
// ---------------------------------------------------------------------------

/// Decode an envelope whose `data` is required.
pub(crate) fn decode_data<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, FetchError> {
    let envelope = decode_envelope::<T>(endpoint, body)?;
    envelope.data.ok_or_else(|| FetchError::MissingData {
        endpoint: endpoint.to_string(),
    })
}

/// Decode an envelope for a mutation; any `data` is ignored.
pub(crate) fn decode_ack(endpoint: &str, body: &str) -> Result<(), FetchError> {
    decode_envelope::<serde_json::Value>(endpoint, body).map(|_| ())
}

fn decode_envelope<T: DeserializeOwned>(
    endpoint: &str,
    body: &str,
) -> Result<ApiResponse<T>, FetchError> {
    let envelope: ApiResponse<T> =
        serde_json::from_str(body).map_err(|source| FetchError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;
    if !envelope.success {
        return Err(FetchError::Rejected {
            endpoint: endpoint.to_string(),
            message: envelope
                .message
                .unwrap_or_else(|| "no reason given".to_string()),
        });
    }
    Ok(envelope)
}

// ---------------------------------------------------------------------------
// HttpDataService
// ---------------------------------------------------------------------------

/// `MatchDataService` over HTTP with reqwest.
pub struct HttpDataService {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpDataService {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_token,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.server.api_base_url.clone(),
            config.credentials.api_token.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, path: &str, request: reqwest::RequestBuilder) -> Result<String, FetchError> {
        let request = match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|source| FetchError::Transport {
            endpoint: path.to_string(),
            source,
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| FetchError::Transport {
            endpoint: path.to_string(),
            source,
        })?;
        if !status.is_success() {
            warn!("{path} returned HTTP {status}: {body}");
            // Error bodies often still carry the envelope with a message.
            if let Err(rejected @ FetchError::Rejected { .. }) = decode_ack(path, &body) {
                return Err(rejected);
            }
            return Err(FetchError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }
        debug!("{path} -> HTTP {status}");
        Ok(body)
    }

    async fn get<T: DeserializeOwned>(&self, path: String) -> Result<T, FetchError> {
        let body = self.send(&path, self.http.get(self.url(&path))).await?;
        decode_data(&path, &body)
    }

    async fn post(&self, path: String) -> Result<(), FetchError> {
        let body = self.send(&path, self.http.post(self.url(&path))).await?;
        decode_ack(&path, &body)
    }
}

#[async_trait]
impl MatchDataService for HttpDataService {
    async fn fetch_match_state(&self, match_id: &str) -> Result<MatchStateDto, FetchError> {
        self.get(match_state_path(match_id)).await
    }

    async fn undo_last_ball(&self, match_id: &str) -> Result<(), FetchError> {
        self.post(undo_path(match_id)).await
    }

    async fn submit_toss(&self, match_id: &str, toss: &TossRequest) -> Result<(), FetchError> {
        let path = toss_path(match_id);
        let body = self
            .send(&path, self.http.post(self.url(&path)).json(toss))
            .await?;
        decode_ack(&path, &body)
    }

    async fn select_next_batsman(
        &self,
        match_id: &str,
        player_id: &str,
    ) -> Result<(), FetchError> {
        self.post(next_batsman_path(match_id, player_id)).await
    }

    async fn select_next_bowler(&self, match_id: &str, player_id: &str) -> Result<(), FetchError> {
        self.post(next_bowler_path(match_id, player_id)).await
    }

    async fn start_second_innings(&self, match_id: &str) -> Result<(), FetchError> {
        self.post(start_second_innings_path(match_id)).await
    }

    async fn playing_xi(
        &self,
        match_id: &str,
        side: TeamSide,
    ) -> Result<Vec<PlayerRef>, FetchError> {
        self.get(playing_xi_path(match_id, side)).await
    }

    async fn batting_available(&self, match_id: &str) -> Result<Vec<PlayerRef>, FetchError> {
        self.get(batting_available_path(match_id)).await
    }
}
