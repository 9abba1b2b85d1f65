//! Append-only audit trail for access and sharing events.
//!
//! Recording never fails the operation being audited: callers write after
//! their primary effect has succeeded and a failed insert is only logged.

use super::metadata_store::MetadataStore;
use crate::models::access_log::{AccessAction, NewAccessLog};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AccessAuditor {
    metadata: Arc<dyn MetadataStore>,
}

impl AccessAuditor {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Append one entry. Returns whether it was stored.
    pub async fn record(
        &self,
        file_id: &str,
        user_id: &str,
        action: AccessAction,
        message: impl Into<String>,
        view_only: bool,
    ) -> bool {
        let entry = NewAccessLog {
            file_id: file_id.to_string(),
            user_id: user_id.to_string(),
            action,
            message: message.into(),
            view_only,
        };
        match self.metadata.insert_access_log(&entry).await {
            Ok(row) => {
                debug!("audit {} on {} by {} ({})", action, file_id, user_id, row.id);
                true
            }
            Err(err) => {
                warn!(
                    "failed to record {} access log for file {} (user {}): {}",
                    action, file_id, user_id, err
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_metadata;

    #[tokio::test]
    async fn records_are_appended() {
        let store = Arc::new(memory_metadata().await);
        let auditor = AccessAuditor::new(store.clone());

        assert!(
            auditor
                .record("f1", "bob", AccessAction::Viewed, "opened", true)
                .await
        );
        let entries = store.access_logs_for_file("f1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "viewed");
        assert_eq!(entries[0].message, "opened");
    }

    #[tokio::test]
    async fn insert_failure_is_swallowed() {
        let store = Arc::new(memory_metadata().await);
        sqlx::query("DROP TABLE access_logs")
            .execute(store.pool())
            .await
            .unwrap();
        let auditor = AccessAuditor::new(store);

        assert!(
            !auditor
                .record("f1", "bob", AccessAction::RevokedView, "revoked", false)
                .await
        );
    }
}
