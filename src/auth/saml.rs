// [business] SAML attribute authentication - the SP in front forwards attributes as headers, multiple values joined with `;`

use super::{AuthBackendConfig, RequestContext};
use crate::error::{EnrollError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

fn default_user_id_attribute() -> String {
    "eduPersonPrincipalName".to_string()
}

fn default_header_prefix() -> String {
    "x-saml-attr-".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamlParams {
    #[serde(default = "default_user_id_attribute")]
    pub user_id_attribute: String,
    #[serde(default = "default_header_prefix")]
    pub header_prefix: String,
    /// Where to send browsers without a SAML session.
    #[serde(default)]
    pub login_url: Option<String>,
}

impl Default for SamlParams {
    fn default() -> Self {
        Self {
            user_id_attribute: default_user_id_attribute(),
            header_prefix: default_header_prefix(),
            login_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamlAuth {
    params: SamlParams,
}

impl SamlAuth {
    pub fn new(params: SamlParams) -> Self {
        Self { params }
    }

    fn header_name(&self, attribute: &str) -> String {
        format!("{}{}", self.params.header_prefix, attribute).to_ascii_lowercase()
    }

    /// The single value of an attribute; anything else is treated as no session.
    pub fn single_attribute_value(&self, ctx: &RequestContext, attribute: &str) -> Result<String> {
        let raw = ctx.header(&self.header_name(attribute)).ok_or_else(|| {
            EnrollError::AuthRequired {
                reason: format!("attribute {} not present in SAML assertion", attribute),
                login_url: self.params.login_url.clone(),
            }
        })?;

        let values: Vec<&str> = raw
            .split(';')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        match values.as_slice() {
            [value] => Ok((*value).to_string()),
            other => Err(EnrollError::auth_required(format!(
                "attribute {} was expected to have exactly 1 value, but has {}",
                attribute,
                other.len()
            ))),
        }
    }

    pub async fn require_auth(&self, ctx: &RequestContext) -> Result<String> {
        let user_id = self.single_attribute_value(ctx, &self.params.user_id_attribute)?;
        debug!(user_id = %user_id, "SAML session authenticated");
        Ok(user_id)
    }

    // Longest suffix of the user's domain that names a known realm
    pub fn guess_realm(
        &self,
        ctx: &RequestContext,
        known: &BTreeMap<String, AuthBackendConfig>,
    ) -> Option<String> {
        let user_id = self
            .single_attribute_value(ctx, &self.params.user_id_attribute)
            .ok()?;
        let (_, domain) = user_id.rsplit_once('@')?;
        let domain = domain.to_ascii_lowercase();

        let mut candidate = domain.as_str();
        loop {
            if known.contains_key(candidate) {
                return Some(candidate.to_string());
            }
            candidate = candidate.split_once('.')?.1;
        }
    }
}
