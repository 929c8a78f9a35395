//! Oracle for hosts without a privacy database

use async_trait::async_trait;

use crate::application::ports::PermissionOracle;
use crate::domain::permissions::{Capability, GrantState};

/// Every capability is implicitly granted.
#[derive(Debug, Default)]
pub struct UnsupportedPermissionOracle;

impl UnsupportedPermissionOracle {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PermissionOracle for UnsupportedPermissionOracle {
    async fn status(&self, _capability: Capability) -> GrantState {
        GrantState::Granted
    }

    async fn prompt(&self, _capability: Capability) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn everything_is_granted() {
        let oracle = UnsupportedPermissionOracle::new();
        for capability in Capability::ALL {
            assert_eq!(oracle.status(capability).await, GrantState::Granted);
        }
    }
}
