//! Publishing provider client (Instagram Graph API).

use crate::config::Credentials;
use crate::error::ProviderError;
use crate::posts::ScheduledPost;
use crate::signing::appsecret_proof;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const POST_FIELDS: &str = "id,caption,media_url,thumbnail_url,scheduled_publish_time,timestamp,status_code,status,is_published,permalink";
const QUOTA_FIELDS: &str = "quota_usage,config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub caption: String,
    pub image_url: String,
    /// ISO-8601 instant, passed through to the provider as given.
    pub publish_at: Option<String>,
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scheduled_publish_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishingQuota {
    pub quota_usage: u32,
    pub quota_total: u32,
    pub quota_remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes immediately when `publish_at` is absent, otherwise schedules.
    async fn schedule_post(
        &self,
        request: &ScheduleRequest,
    ) -> Result<CreationResult, ProviderError>;

    /// Posts in the order the provider returns them.
    async fn fetch_scheduled_posts(&self) -> Result<Vec<ScheduledPost>, ProviderError>;

    /// `None` when the provider has no quota data.
    async fn fetch_publishing_limit(&self) -> Result<Option<PublishingQuota>, ProviderError>;
}

pub struct GraphClient {
    http: Client,
    base_url: String,
    account_id: String,
    access_token: String,
    proof: Option<String>,
}

#[derive(Serialize)]
struct MediaBody<'a> {
    image_url: &'a str,
    caption: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    published: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled_publish_time: Option<&'a str>,
}

#[derive(Serialize)]
struct PublishBody<'a> {
    creation_id: &'a str,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct DataResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct RawQuota {
    quota_usage: Option<u32>,
    config: Option<QuotaConfig>,
    reset_time: Option<String>,
}

#[derive(Deserialize)]
struct QuotaConfig {
    quota_total: Option<u32>,
}

#[derive(Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Deserialize)]
struct GraphErrorBody {
    message: String,
    #[serde(default)]
    error_user_msg: Option<String>,
}

impl From<RawQuota> for PublishingQuota {
    fn from(raw: RawQuota) -> Self {
        let usage = raw.quota_usage.unwrap_or(0);
        let total = raw.config.and_then(|c| c.quota_total).unwrap_or(0);
        Self {
            quota_usage: usage,
            quota_total: total,
            quota_remaining: total.saturating_sub(usage),
            reset_time: raw.reset_time,
        }
    }
}

impl GraphClient {
    pub fn new(http: Client, creds: &Credentials) -> Self {
        Self {
            http,
            base_url: creds.graph_url.clone(),
            account_id: creds.account_id.clone(),
            access_token: creds.access_token.clone(),
            proof: creds
                .app_secret
                .as_deref()
                .map(|secret| appsecret_proof(&creds.access_token, secret)),
        }
    }

    fn url(&self, edge: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.account_id, edge)
    }

    fn auth_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("access_token", self.access_token.clone())];
        if let Some(proof) = &self.proof {
            params.push(("appsecret_proof", proof.clone()));
        }
        params
    }

    async fn get<T: DeserializeOwned>(
        &self,
        edge: &str,
        fields: &str,
    ) -> Result<T, ProviderError> {
        let mut query = self.auth_params();
        query.push(("fields", fields.to_string()));
        let resp = self
            .http
            .get(self.url(edge))
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        decode(check(resp).await?).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        edge: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let resp = self
            .http
            .post(self.url(edge))
            .query(&self.auth_params())
            .form(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        decode(check(resp).await?).await
    }
}

async fn check(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.as_u16() == 401 {
        tracing::error!(
            "Received 401 Unauthorized from the Graph API. \
             Your access token may be expired or revoked. \
             Regenerate it and update INSTAGRAM_ACCESS_TOKEN."
        );
    }
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<GraphErrorEnvelope>(&body) {
        Ok(envelope) => envelope.error.error_user_msg.unwrap_or(envelope.error.message),
        Err(_) if body.is_empty() => format!("Graph API error ({status})"),
        Err(_) => format!("Graph API error ({status}): {body}"),
    };
    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimit(format!("{message} Try again later.")));
    }
    Err(ProviderError::Api(message))
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ProviderError> {
    resp.json()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

#[async_trait]
impl Publisher for GraphClient {
    async fn schedule_post(
        &self,
        request: &ScheduleRequest,
    ) -> Result<CreationResult, ProviderError> {
        let scheduled = request.publish_at.as_deref();
        let body = MediaBody {
            image_url: &request.image_url,
            caption: &request.caption,
            location_id: request.location_id.as_deref(),
            published: scheduled.map(|_| false),
            scheduled_publish_time: scheduled,
        };
        let container: IdResponse = self.post("media", &body).await?;
        tracing::info!(
            creation_id = %container.id,
            scheduled = scheduled.is_some(),
            "Media container created"
        );

        if let Some(at) = scheduled {
            return Ok(CreationResult {
                id: container.id,
                media_id: None,
                scheduled_publish_time: Some(at.to_string()),
            });
        }

        let published: IdResponse = self
            .post(
                "media_publish",
                &PublishBody {
                    creation_id: &container.id,
                },
            )
            .await?;
        tracing::info!(media_id = %published.id, "Media published");
        Ok(CreationResult {
            id: container.id,
            media_id: Some(published.id),
            scheduled_publish_time: None,
        })
    }

    async fn fetch_scheduled_posts(&self) -> Result<Vec<ScheduledPost>, ProviderError> {
        let resp: DataResponse<ScheduledPost> = self.get("scheduled_posts", POST_FIELDS).await?;
        Ok(resp.data)
    }

    async fn fetch_publishing_limit(&self) -> Result<Option<PublishingQuota>, ProviderError> {
        let resp: DataResponse<RawQuota> =
            self.get("content_publishing_limit", QUOTA_FIELDS).await?;
        Ok(resp.data.into_iter().next().map(PublishingQuota::from))
    }
}
