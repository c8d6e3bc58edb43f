//! Server endpoint URLs and room creation settings.

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::constants::{
    CHOOSING_DURATION_RANGE, DRAWING_DURATION_RANGE, MAX_PLAYERS_RANGE, ROUNDS_RANGE, WORDS_RANGE,
};

/// HTTP and WebSocket endpoints of one game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    api_base: String,
    ws_base: String,
}

impl Endpoints {
    /// Endpoints rooted at `api_base` (http/https) and `ws_base` (ws/wss).
    pub fn new(api_base: impl Into<String>, ws_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            ws_base: ws_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `POST` login.
    pub fn login(&self) -> String {
        format!("{}/auth/login", self.api_base)
    }

    /// `POST` signup.
    pub fn signup(&self) -> String {
        format!("{}/auth/signup", self.api_base)
    }

    /// `POST` logout.
    pub fn logout(&self) -> String {
        format!("{}/auth/logout", self.api_base)
    }

    /// `GET` session refresh.
    pub fn refresh(&self) -> String {
        format!("{}/auth/refresh", self.api_base)
    }

    /// `GET` public room listing.
    pub fn public_games(&self) -> String {
        format!("{}/game/games", self.api_base)
    }

    /// Socket address that creates a new room with `settings`.
    pub fn create_game(&self, settings: &GameSettings) -> Result<String> {
        let mut url = Url::parse(&format!("{}/game/create", self.ws_base))
            .with_context(|| format!("invalid WebSocket base URL: {}", self.ws_base))?;
        url.query_pairs_mut()
            .append_pair("private", &settings.private.to_string())
            .append_pair("maxPlayers", &settings.max_players.to_string())
            .append_pair("roundsCount", &settings.rounds_count.to_string())
            .append_pair("wordsCount", &settings.words_count.to_string())
            .append_pair(
                "choosingWordDuration",
                &settings.choosing_word_duration.to_string(),
            )
            .append_pair("drawingDuration", &settings.drawing_duration.to_string());
        Ok(url.into())
    }

    /// Socket address that joins room `room_id`.
    pub fn join_room(&self, room_id: &str) -> Result<String> {
        if room_id.trim().is_empty() {
            bail!("room id must not be empty");
        }
        let mut url = Url::parse(&format!("{}/game/join", self.ws_base))
            .with_context(|| format!("invalid WebSocket base URL: {}", self.ws_base))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("WebSocket base URL cannot hold a path: {}", self.ws_base))?
            .push(room_id);
        Ok(url.into())
    }
}

/// Settings for a new room. Limits mirror what the server accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    /// Hide the room from the public listing.
    pub private: bool,
    /// Player cap, 2–20.
    pub max_players: u32,
    /// Number of rounds, 1–10.
    pub rounds_count: u32,
    /// Word choices offered to the drawer, 1–5.
    pub words_count: u32,
    /// Seconds to pick a word, 5–120.
    pub choosing_word_duration: u64,
    /// Seconds to draw, 30–300.
    pub drawing_duration: u64,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            private: false,
            max_players: 8,
            rounds_count: 3,
            words_count: 3,
            choosing_word_duration: 15,
            drawing_duration: 80,
        }
    }
}

impl GameSettings {
    /// Check every field against the server's limits.
    pub fn validate(&self) -> Result<()> {
        if !MAX_PLAYERS_RANGE.contains(&self.max_players) {
            bail!(
                "maxPlayers must be between {} and {}",
                MAX_PLAYERS_RANGE.start(),
                MAX_PLAYERS_RANGE.end()
            );
        }
        if !ROUNDS_RANGE.contains(&self.rounds_count) {
            bail!(
                "roundsCount must be between {} and {}",
                ROUNDS_RANGE.start(),
                ROUNDS_RANGE.end()
            );
        }
        if !WORDS_RANGE.contains(&self.words_count) {
            bail!(
                "wordsCount must be between {} and {}",
                WORDS_RANGE.start(),
                WORDS_RANGE.end()
            );
        }
        if !CHOOSING_DURATION_RANGE.contains(&self.choosing_word_duration) {
            bail!(
                "choosingWordDuration must be between {} and {} seconds",
                CHOOSING_DURATION_RANGE.start(),
                CHOOSING_DURATION_RANGE.end()
            );
        }
        if !DRAWING_DURATION_RANGE.contains(&self.drawing_duration) {
            bail!(
                "drawingDuration must be between {} and {} seconds",
                DRAWING_DURATION_RANGE.start(),
                DRAWING_DURATION_RANGE.end()
            );
        }
        Ok(())
    }
}
