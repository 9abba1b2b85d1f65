//! Append-only audit entries for file access and sharing events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Kinds of audited events. Stored as their snake_case name.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    Viewed,
    Downloaded,
    SharedView,
    SharedDownload,
    RevokedView,
    ShareMethodChanged,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewed => "viewed",
            Self::Downloaded => "downloaded",
            Self::SharedView => "shared_view",
            Self::SharedDownload => "shared_download",
            Self::RevokedView => "revoked_view",
            Self::ShareMethodChanged => "share_method_changed",
        }
    }
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `access_logs`. Never updated or deleted.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub id: String,
    pub file_id: String,
    pub user_id: String,
    /// Snake_case name of an [`AccessAction`].
    pub action: String,
    pub message: String,
    pub view_only: bool,
    pub timestamp: DateTime<Utc>,
}

/// Input for [`AccessLogEntry`]; id and timestamp are assigned on insert.
#[derive(Clone, Debug)]
pub struct NewAccessLog {
    pub file_id: String,
    pub user_id: String,
    pub action: AccessAction,
    pub message: String,
    pub view_only: bool,
}
