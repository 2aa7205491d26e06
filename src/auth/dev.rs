// [business] Development backend - every browser is the same configured user
use super::{AuthBackendConfig, RequestContext};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevParams {
    pub user_id: String,
    #[serde(default)]
    pub realm_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DevAuth {
    params: DevParams,
}

impl DevAuth {
    pub fn new(params: DevParams) -> Self {
        Self { params }
    }

    pub async fn require_auth(&self, _ctx: &RequestContext) -> Result<String> {
        warn!(user_id = %self.params.user_id, "Development authentication in use");
        Ok(self.params.user_id.clone())
    }

    pub fn guess_realm(
        &self,
        _ctx: &RequestContext,
        known: &BTreeMap<String, AuthBackendConfig>,
    ) -> Option<String> {
        self.params
            .realm_hint
            .clone()
            .filter(|hint| known.contains_key(hint))
    }
}
