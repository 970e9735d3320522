//! Room directory client.
//!
//! The backend manages rooms over plain GET requests with query parameters.
//! Membership changes made here are what the backend acts on; the runtime
//! mirrors them into the engine only after the call succeeds.

use async_trait::async_trait;
use parley_core::{IdentityId, RoomId, RoomInfo, RoomStatus, Unit};
use serde::{Deserialize, de::DeserializeOwned};

use crate::error::DirectoryError;

/// Room management operations the runtime needs from the backend.
#[async_trait]
pub trait RoomDirectory: Send + Sync + 'static {
    /// Every room with its capacity and state.
    async fn list_rooms(&self) -> Result<Vec<(RoomId, RoomInfo)>, DirectoryError>;

    /// Create a room holding at most `max_units` members.
    async fn create_room(&self, max_units: u32) -> Result<RoomId, DirectoryError>;

    /// Delete a room.
    async fn delete_room(&self, room: RoomId) -> Result<(), DirectoryError>;

    /// Add `identity` to `room`.
    async fn join_room(&self, room: RoomId, identity: IdentityId) -> Result<(), DirectoryError>;

    /// Remove `identity` from `room`.
    async fn quit_room(&self, room: RoomId, identity: IdentityId) -> Result<(), DirectoryError>;

    /// Current members of `room`.
    async fn members(&self, room: RoomId) -> Result<Vec<Unit>, DirectoryError>;
}

/// One entry of `/room/list`.
///
/// The backend serializes its room struct without field tags, so both the
/// snake_case and the Go field names are accepted.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RoomSummary {
    /// Room id
    #[serde(alias = "RoomId")]
    pub room_id: RoomId,
    /// Capacity
    #[serde(alias = "MaxUnitSize")]
    pub max_unit_size: u32,
    /// State code
    #[serde(alias = "State", default)]
    pub state: i32,
}

impl RoomSummary {
    fn into_info(self) -> Result<(RoomId, RoomInfo), DirectoryError> {
        let status = RoomStatus::from_code(self.state)
            .ok_or(DirectoryError::UnknownRoomState { room: self.room_id, code: self.state })?;
        Ok((self.room_id, RoomInfo { max_units: self.max_unit_size, status }))
    }
}

#[derive(Debug, Deserialize)]
struct CreatedRoom {
    room_id: RoomId,
}

#[derive(Debug, Deserialize)]
struct UnitSummary {
    id: IdentityId,
    nickname: String,
}

#[derive(Debug, Deserialize)]
struct UnitsResponse {
    #[serde(default)]
    units: Vec<UnitSummary>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`RoomDirectory`] over the backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpRoomDirectory {
    http: reqwest::Client,
    base: String,
}

impl HttpRoomDirectory {
    /// Directory rooted at `base`, e.g. `http://localhost:8080`.
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base)
    }

    /// Directory using an existing HTTP client.
    pub fn with_client(http: reqwest::Client, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { http, base }
    }

    /// Base URL requests are made against.
    pub fn base(&self) -> &str {
        &self.base
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, DirectoryError> {
        let url = format!("{}{path}", self.base);
        tracing::trace!(%url, ?query, "directory request");

        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message(&body);
            return Err(DirectoryError::Status { status: status.as_u16(), message });
        }
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DirectoryError> {
        let body = self.get(path, query).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Error text of a failed response: the `error` field of a JSON body, or the
/// body itself with surrounding whitespace removed.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    async fn list_rooms(&self) -> Result<Vec<(RoomId, RoomInfo)>, DirectoryError> {
        // Empty store is encoded as `null`
        let rooms: Option<Vec<RoomSummary>> = self.get_json("/room/list", &[]).await?;
        rooms.unwrap_or_default().into_iter().map(RoomSummary::into_info).collect()
    }

    async fn create_room(&self, max_units: u32) -> Result<RoomId, DirectoryError> {
        let created: CreatedRoom =
            self.get_json("/room/create", &[("max_unit_size", max_units.to_string())]).await?;
        Ok(created.room_id)
    }

    async fn delete_room(&self, room: RoomId) -> Result<(), DirectoryError> {
        self.get("/room/delete", &[("room_id", room.to_string())]).await?;
        Ok(())
    }

    async fn join_room(&self, room: RoomId, identity: IdentityId) -> Result<(), DirectoryError> {
        let query = [("room_id", room.to_string()), ("user_id", identity.to_string())];
        self.get("/room/join", &query).await?;
        Ok(())
    }

    async fn quit_room(&self, room: RoomId, identity: IdentityId) -> Result<(), DirectoryError> {
        let query = [("room_id", room.to_string()), ("user_id", identity.to_string())];
        self.get("/room/quit", &query).await?;
        Ok(())
    }

    async fn members(&self, room: RoomId) -> Result<Vec<Unit>, DirectoryError> {
        let query = [("room_id", room.to_string())];
        let response: UnitsResponse = self.get_json("/room/get_units", &query).await?;
        Ok(response.units.into_iter().map(|u| Unit { id: u.id, nickname: u.nickname }).collect())
    }
}
