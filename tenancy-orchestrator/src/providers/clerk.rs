//! Identity provider client for the Clerk backend API.

use super::{ExternalOrganization, IdentityProvider, ProviderError};
use async_trait::async_trait;
use reqwest::{multipart, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct ClerkConfig {
    pub secret_key: String,
    pub api_base: String,
    pub timeout: Duration,
}

// Keeps the key out of logs and panic messages.
impl fmt::Debug for ClerkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClerkConfig")
            .field("secret_key", &"[redacted]")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ClerkConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            api_base: "https://api.clerk.com".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

pub struct ClerkIdentityProvider {
    client: Client,
    config: ClerkConfig,
}

impl ClerkIdentityProvider {
    pub fn new(config: ClerkConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("tenancy-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path);
        self.client
            .request(method, url)
            .bearer_auth(&self.config.secret_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[derive(Serialize)]
struct CreateOrganizationBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    slug: Option<&'a str>,
}

#[derive(Deserialize)]
struct ClerkOrganization {
    id: String,
    name: String,
    slug: Option<String>,
}

impl From<ClerkOrganization> for ExternalOrganization {
    fn from(org: ClerkOrganization) -> Self {
        Self {
            id: org.id,
            name: org.name,
            slug: org.slug,
        }
    }
}

#[derive(Deserialize)]
struct ClerkOrganizationPage {
    data: Vec<ClerkOrganization>,
    total_count: usize,
}

#[async_trait]
impl IdentityProvider for ClerkIdentityProvider {
    async fn create_organization(
        &self,
        name: &str,
        slug: Option<&str>,
    ) -> Result<ExternalOrganization, ProviderError> {
        let org: ClerkOrganization = self
            .send(
                self.request(Method::POST, "organizations")
                    .json(&CreateOrganizationBody { name, slug }),
            )
            .await?;
        Ok(org.into())
    }

    async fn set_logo(
        &self,
        org_id: &str,
        content_type: &str,
        image: Vec<u8>,
    ) -> Result<(), ProviderError> {
        let part = multipart::Part::bytes(image)
            .file_name("logo")
            .mime_str(content_type)?;
        let form = multipart::Form::new().part("file", part);

        let _: ClerkOrganization = self
            .send(
                self.request(Method::PUT, &format!("organizations/{org_id}/logo"))
                    .multipart(form),
            )
            .await?;
        Ok(())
    }

    async fn get_organization(
        &self,
        org_id: &str,
    ) -> Result<Option<ExternalOrganization>, ProviderError> {
        match self
            .send::<ClerkOrganization>(
                self.request(Method::GET, &format!("organizations/{org_id}")),
            )
            .await
        {
            Ok(org) => Ok(Some(org.into())),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_organizations(&self) -> Result<Vec<ExternalOrganization>, ProviderError> {
        let mut organizations = Vec::new();

        loop {
            let page: ClerkOrganizationPage = self
                .send(self.request(Method::GET, "organizations").query(&[
                    ("limit", PAGE_SIZE.to_string()),
                    ("offset", organizations.len().to_string()),
                ]))
                .await?;

            let fetched = page.data.len();
            organizations.extend(page.data.into_iter().map(ExternalOrganization::from));

            if fetched == 0 || organizations.len() >= page.total_count {
                break;
            }
        }

        Ok(organizations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_body_omits_missing_slug() {
        let body = serde_json::to_value(CreateOrganizationBody {
            name: "Acme",
            slug: None,
        })
        .unwrap();
        assert_eq!(body, json!({ "name": "Acme" }));
    }

    #[test]
    fn test_organization_page_decodes() {
        let page: ClerkOrganizationPage = serde_json::from_value(json!({
            "data": [
                { "object": "organization", "id": "org_1", "name": "Acme", "slug": "acme" },
                { "object": "organization", "id": "org_2", "name": "Globex", "slug": null }
            ],
            "total_count": 2
        }))
        .unwrap();

        let orgs: Vec<ExternalOrganization> = page.data.into_iter().map(Into::into).collect();
        assert_eq!(orgs.len(), 2);
        assert_eq!(orgs[0].slug.as_deref(), Some("acme"));
        assert_eq!(orgs[1].slug, None);
        assert_eq!(page.total_count, 2);
    }
}
