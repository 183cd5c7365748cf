//! Open house activation permission
//!
//! Fail-closed: only a person whose permission field holds exactly the
//! configured true marker may toggle open house. A missing person, a missing
//! field, any other value, a lookup error or a lookup timeout all deny.

use crate::domain::types::IdentityId;
use crate::infra::config::Config;
use crate::services::directory::IdentityDirectory;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a permission check, with a name for the logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub permitted: bool,
    /// "First Last" when the directory knows the person, else the raw id
    pub display_name: String,
}

pub struct AuthorizationGate {
    directory: Arc<dyn IdentityDirectory>,
    attribute: String,
    true_marker: String,
    timeout: Duration,
}

impl AuthorizationGate {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        attribute: impl Into<String>,
        true_marker: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self { directory, attribute: attribute.into(), true_marker: true_marker.into(), timeout }
    }

    pub fn from_config(config: &Config, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self::new(
            directory,
            config.permission_attribute(),
            config.permission_true_marker(),
            config.lookup_timeout(),
        )
    }

    pub async fn can_activate(&self, identity: IdentityId) -> bool {
        self.check(identity).await.permitted
    }

    pub async fn check(&self, identity: IdentityId) -> AuthorizationDecision {
        let fallback_name = format!("identity {identity}");

        let lookup = tokio::time::timeout(self.timeout, self.directory.person(identity)).await;
        let person = match lookup {
            Ok(Ok(Some(person))) => person,
            Ok(Ok(None)) => {
                debug!(identity = %identity, "permission_unknown_identity");
                return AuthorizationDecision { permitted: false, display_name: fallback_name };
            }
            Ok(Err(e)) => {
                warn!(identity = %identity, error = %e, "permission_lookup_failed");
                return AuthorizationDecision { permitted: false, display_name: fallback_name };
            }
            Err(_) => {
                warn!(
                    identity = %identity,
                    timeout_ms = %self.timeout.as_millis(),
                    "permission_lookup_timeout"
                );
                return AuthorizationDecision { permitted: false, display_name: fallback_name };
            }
        };

        let permitted = person.field(&self.attribute) == Some(self.true_marker.as_str());
        if !permitted {
            debug!(
                identity = %identity,
                attribute = %self.attribute,
                value = ?person.field(&self.attribute),
                "permission_not_granted"
            );
        }

        AuthorizationDecision { permitted, display_name: person.display_name() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::directory::{PersonRecord, StaticDirectory};
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn person(value: Option<&str>) -> PersonRecord {
        let mut fields = HashMap::new();
        if let Some(v) = value {
            fields.insert("dh_can_open_house".to_string(), v.to_string());
        }
        PersonRecord { first_name: "Ada".to_string(), last_name: "Lovelace".to_string(), fields }
    }

    fn gate_with(records: Vec<(i64, PersonRecord)>) -> AuthorizationGate {
        let mut directory = StaticDirectory::new();
        for (id, record) in records {
            directory.insert(IdentityId(id), record);
        }
        AuthorizationGate::new(
            Arc::new(directory),
            "dh_can_open_house",
            "True",
            Duration::from_millis(200),
        )
    }

    struct FailingDirectory;

    #[async_trait]
    impl IdentityDirectory for FailingDirectory {
        async fn person(&self, _identity: IdentityId) -> anyhow::Result<Option<PersonRecord>> {
            anyhow::bail!("directory offline")
        }
    }

    struct SlowDirectory;

    #[async_trait]
    impl IdentityDirectory for SlowDirectory {
        async fn person(&self, _identity: IdentityId) -> anyhow::Result<Option<PersonRecord>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(person(Some("True"))))
        }
    }

    #[tokio::test]
    async fn test_true_marker_permits() {
        let gate = gate_with(vec![(42, person(Some("True")))]);

        let decision = gate.check(IdentityId(42)).await;

        assert!(decision.permitted);
        assert_eq!(decision.display_name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_other_values_deny() {
        let gate = gate_with(vec![
            (1, person(Some("False"))),
            (2, person(Some("true"))),
            (3, person(Some(""))),
            (4, person(None)),
        ]);

        for id in 1..=4 {
            assert!(!gate.can_activate(IdentityId(id)).await, "identity {id} should be denied");
        }
    }

    #[tokio::test]
    async fn test_unknown_identity_denied() {
        let gate = gate_with(Vec::new());

        let decision = gate.check(IdentityId(99)).await;

        assert!(!decision.permitted);
        assert_eq!(decision.display_name, "identity 99");
    }

    #[tokio::test]
    async fn test_lookup_failure_denied() {
        let gate = AuthorizationGate::new(
            Arc::new(FailingDirectory),
            "dh_can_open_house",
            "True",
            Duration::from_millis(200),
        );

        assert!(!gate.can_activate(IdentityId(42)).await);
    }

    #[tokio::test]
    async fn test_lookup_timeout_denied() {
        let gate = AuthorizationGate::new(
            Arc::new(SlowDirectory),
            "dh_can_open_house",
            "True",
            Duration::from_millis(200),
        );

        assert!(!gate.can_activate(IdentityId(42)).await);
    }
}
