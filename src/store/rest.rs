//! PostgREST-backed result store using a service key

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::results::{MatchId, OutcomeCode, ResultStore, StoreError};

/// Result store speaking the PostgREST dialect (`/rest/v1/...`)
#[derive(Clone)]
pub struct RestResultStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestResultStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Make an authenticated POST request (insert)
    async fn insert<T: Serialize + Sync, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, StoreError> {
        let response = self
            .authorized(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(StoreError::Request)?;
        let response = Self::check(response).await?;

        // PostgREST returns an array, get first element
        let rows: Vec<R> = response.json().await.map_err(StoreError::Parse)?;
        rows.into_iter().next().ok_or(StoreError::NoRowReturned)
    }

    /// Make an authenticated PATCH request (update)
    async fn update<T: Serialize + Sync>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<(), StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .authorized(self.client.patch(url))
            .json(data)
            .send()
            .await
            .map_err(StoreError::Request)?;
        Self::check(response).await.map(|_| ())
    }

    async fn rpc<T: Serialize + Sync>(&self, function: &str, args: &T) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.post(self.rpc_url(function)))
            .json(args)
            .send()
            .await
            .map_err(StoreError::Request)?;
        Self::check(response).await.map(|_| ())
    }
}

/// New row for the games table
#[derive(Debug, Serialize)]
struct NewGame<'a> {
    players: &'a [String],
    scores: [u32; 2],
    game_status: &'static str,
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GameRow {
    game_id: MatchId,
}

#[derive(Debug, Serialize)]
struct FinishedGame<'a> {
    scores: [u32; 2],
    winner_nickname: &'a str,
    game_status: &'static str,
}

#[derive(Debug, Serialize)]
struct OutcomeArgs<'a> {
    p_nickname: &'a str,
    p_game_id: MatchId,
    p_outcome: u8,
}

#[async_trait]
impl ResultStore for RestResultStore {
    async fn create_pending_match(&self, players: &[String]) -> Result<MatchId, StoreError> {
        let row: GameRow = self
            .insert(
                "games",
                &NewGame {
                    players,
                    scores: [0, 0],
                    game_status: "pending",
                    date: Utc::now(),
                },
            )
            .await?;
        Ok(row.game_id)
    }

    async fn finalize_match(
        &self,
        match_id: MatchId,
        final_scores: [u32; 2],
        winner_label: &str,
    ) -> Result<(), StoreError> {
        self.update(
            "games",
            &format!("game_id=eq.{match_id}"),
            &FinishedGame {
                scores: final_scores,
                winner_nickname: winner_label,
                game_status: "finished",
            },
        )
        .await
    }

    async fn record_participant_outcome(
        &self,
        nickname: &str,
        match_id: MatchId,
        outcome: OutcomeCode,
    ) -> Result<(), StoreError> {
        self.rpc(
            "record_game_outcome",
            &OutcomeArgs {
                p_nickname: nickname,
                p_game_id: match_id,
                p_outcome: outcome.code(),
            },
        )
        .await
    }
}
