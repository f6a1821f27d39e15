//! Space membership lookup for approval fan-out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::error::ClientError;

/// A member of a space and the roles they hold there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceMember {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl SpaceMember {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[async_trait]
pub trait SpaceMembership: Send + Sync {
    async fn members_of(&self, space_id: &str) -> Result<Vec<SpaceMember>, ClientError>;
}

/// Membership read from the `membership` table of the dynamic config, so a
/// config reload picks up roster changes
pub struct ConfigMembership {
    runtime_config: Arc<RuntimeConfig>,
}

impl ConfigMembership {
    pub fn new(runtime_config: Arc<RuntimeConfig>) -> Self {
        Self { runtime_config }
    }
}

#[async_trait]
impl SpaceMembership for ConfigMembership {
    async fn members_of(&self, space_id: &str) -> Result<Vec<SpaceMember>, ClientError> {
        let config = self.runtime_config.dynamic();
        Ok(config
            .membership
            .get(space_id)
            .map(|members| {
                members
                    .iter()
                    .map(|m| SpaceMember {
                        user_id: m.user_id.clone(),
                        roles: m.roles.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DynamicConfig, MemberConfig, StaticConfig};

    #[tokio::test]
    async fn test_config_membership_follows_reload() {
        let runtime = Arc::new(RuntimeConfig::new(
            StaticConfig::default(),
            DynamicConfig::default(),
        ));
        let membership = ConfigMembership::new(runtime.clone());
        assert!(membership.members_of("s1").await.unwrap().is_empty());

        let mut next = DynamicConfig::default();
        next.membership.insert(
            "s1".to_string(),
            vec![MemberConfig {
                user_id: "alice".to_string(),
                roles: vec!["approver".to_string(), "editor".to_string()],
            }],
        );
        runtime.update_dynamic(next);

        let members = membership.members_of("s1").await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].has_role("approver"));
        assert!(!members[0].has_role("admin"));
    }
}
