//! Share grants: how an owner has given a recipient access to one file.
//!
//! A relationship for a given `(sender, recipient, file)` triple is either a
//! download grant (a `received_files` row mirrored by a `sent_files` row) or a
//! view grant (a `shared_files_view` row). Only one kind is active at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};

/// The two mutually exclusive ways a file can be shared.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ShareMethod {
    View,
    Download,
}

impl ShareMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for ShareMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Self::View),
            "download" => Ok(Self::Download),
            other => Err(other.to_string()),
        }
    }
}

/// Recipient side of a download grant (`received_files`).
///
/// Carries expiry and acceptance; the sender's outbox view is the
/// denormalized [`SentRecord`].
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DownloadGrant {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub file_id: String,
    pub received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Opaque JSON supplied by the sender (key-exchange material, nonce, ...).
    pub metadata: String,
    pub accepted: bool,
}

impl DownloadGrant {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Sender side mirror of a download grant (`sent_files`).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SentRecord {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub file_id: String,
    pub metadata: String,
    pub sent_at: DateTime<Utc>,
}

/// A view-only grant (`shared_files_view`).
///
/// Revoked grants are kept for audit; at most one non-revoked row exists per
/// `(sender_id, recipient_id, file_id)`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ViewGrant {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub file_id: String,
    /// Points at a rotated underlying object after re-encryption.
    #[sqlx(rename = "newfile_id")]
    pub new_file_id: Option<String>,
    pub metadata: String,
    pub shared_at: DateTime<Utc>,
    /// `None` means the grant never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub access_granted: bool,
}

impl ViewGrant {
    /// Active, granted and not past its expiry.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked
            && self.access_granted
            && self.expires_at.is_none_or(|expires| now < expires)
    }

    /// Id of the object the recipient actually reads.
    pub fn object_file_id(&self) -> &str {
        self.new_file_id.as_deref().unwrap_or(&self.file_id)
    }
}

/// Input for creating a download grant pair.
#[derive(Clone, Debug)]
pub struct NewDownloadGrant {
    pub sender_id: String,
    pub recipient_id: String,
    pub file_id: String,
    pub metadata: String,
    pub expires_at: DateTime<Utc>,
}

/// Input for creating (or refreshing) the active view grant of a triple.
#[derive(Clone, Debug)]
pub struct NewViewGrant {
    pub sender_id: String,
    pub recipient_id: String,
    pub file_id: String,
    pub metadata: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(expires_at: Option<DateTime<Utc>>) -> ViewGrant {
        ViewGrant {
            id: "g".into(),
            sender_id: "owner".into(),
            recipient_id: "bob".into(),
            file_id: "f1".into(),
            new_file_id: None,
            metadata: "{}".into(),
            shared_at: Utc::now(),
            expires_at,
            revoked: false,
            revoked_at: None,
            access_granted: true,
        }
    }

    #[test]
    fn share_method_parses_known_names_only() {
        assert_eq!("view".parse::<ShareMethod>(), Ok(ShareMethod::View));
        assert_eq!("download".parse::<ShareMethod>(), Ok(ShareMethod::Download));
        assert_eq!("email".parse::<ShareMethod>(), Err("email".to_string()));
    }

    #[test]
    fn view_grant_usability_follows_expiry_and_revocation() {
        let now = Utc::now();
        assert!(grant(None).is_usable_at(now));
        assert!(grant(Some(now + Duration::hours(1))).is_usable_at(now));
        assert!(!grant(Some(now - Duration::seconds(1))).is_usable_at(now));

        let mut revoked = grant(None);
        revoked.revoked = true;
        assert!(!revoked.is_usable_at(now));
    }

    #[test]
    fn rotated_object_id_wins() {
        let mut g = grant(None);
        assert_eq!(g.object_file_id(), "f1");
        g.new_file_id = Some("f1-rotated".into());
        assert_eq!(g.object_file_id(), "f1-rotated");
    }
}
