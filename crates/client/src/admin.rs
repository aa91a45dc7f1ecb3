//! Privileged server endpoints, authenticated by the admin secret.

use serde::Serialize;
use serde_json::json;

use mew_domain::error::{Error, Result};
use mew_domain::types::BootstrapBot;

use crate::http::{api_error, from_reqwest};

/// Optional presentation fields attached to a service-type registration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceTypeRegistration {
    #[serde(rename = "serviceType")]
    pub service_type: String,
    #[serde(rename = "serverName", skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "configTemplate", skip_serializing_if = "String::is_empty")]
    pub config_template: String,
}

impl ServiceTypeRegistration {
    pub fn new(service_type: &str) -> Self {
        Self { service_type: service_type.trim().to_owned(), ..Default::default() }
    }

    /// Normalize whitespace and default the display name to the service type.
    pub fn normalized(mut self) -> Self {
        self.service_type = self.service_type.trim().to_owned();
        self.server_name = self.server_name.trim().to_owned();
        self.icon = self.icon.trim().to_owned();
        self.description = self.description.trim().to_owned();
        if self.server_name.is_empty() {
            self.server_name = self.service_type.clone();
        }
        self
    }
}

/// Client for the control-plane endpoints (`X-Mew-Admin-Secret`).
#[derive(Clone)]
pub struct AdminClient {
    api_base: String,
    admin_secret: String,
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new(api_base: &str, admin_secret: &str, http: reqwest::Client) -> Result<Self> {
        let api_base = api_base.trim_end_matches('/').to_owned();
        if api_base.is_empty() {
            return Err(Error::Config("api base is required".into()));
        }
        if admin_secret.trim().is_empty() {
            return Err(Error::Config("admin secret is required".into()));
        }
        Ok(Self { api_base, admin_secret: admin_secret.trim().to_owned(), http })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Idempotent registration of this host's service type.
    pub async fn register_service_type(&self, reg: &ServiceTypeRegistration) -> Result<()> {
        let url = format!("{}/infra/service-types/register", self.api_base);
        let resp = self
            .http
            .post(&url)
            .header("X-Mew-Admin-Secret", &self.admin_secret)
            .json(reg)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        Ok(())
    }

    /// Fetch the authoritative bot list for this service type.
    pub async fn bootstrap_bots(&self, service_type: &str) -> Result<Vec<BootstrapBot>> {
        let url = format!("{}/bots/bootstrap", self.api_base);
        let resp = self
            .http
            .post(&url)
            .header("X-Mew-Admin-Secret", &self.admin_secret)
            .json(&json!({ "serviceType": service_type }))
            .send()
            .await
            .map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        #[derive(serde::Deserialize)]
        struct BootstrapResponse {
            #[serde(default)]
            bots: Vec<BootstrapBot>,
        }
        let parsed: BootstrapResponse = resp.json().await.map_err(from_reqwest)?;
        Ok(parsed.bots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_defaults_server_name() {
        let reg = ServiceTypeRegistration {
            service_type: " feed-fetcher ".into(),
            ..Default::default()
        }
        .normalized();
        assert_eq!(reg.service_type, "feed-fetcher");
        assert_eq!(reg.server_name, "feed-fetcher");
    }

    #[test]
    fn admin_client_rejects_empty_secret() {
        let http = reqwest::Client::new();
        assert!(AdminClient::new("http://localhost:3000/api", "  ", http).is_err());
    }
}
