use crate::assets::{AssetHost, CloudinaryClient, ImageFile};
use crate::config::{Config, ConfigError, EnvStatus};
use crate::dashboard;
use crate::error::{AppError, Result};
use crate::form::PublishResponse;
use crate::graph::{GraphClient, Publisher, ScheduleRequest};
use crate::params::{IMAGE_REQUIRED, PublishParams};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    routing::{get, post},
};
use chrono_tz::Tz;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 8MB image plus multipart overhead.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct Services {
    pub assets: Arc<dyn AssetHost>,
    pub publisher: Arc<dyn Publisher>,
}

/// Everything a request needs, resolved once at start-up.
pub struct AppState {
    pub env: EnvStatus,
    pub timezone: Tz,
    services: Option<Services>,
}

impl AppState {
    pub fn new(env: EnvStatus, timezone: Tz, services: Option<Services>) -> Self {
        Self {
            env,
            timezone,
            services,
        }
    }

    /// Builds the provider clients when credentials are complete. A partial
    /// configuration still yields a state so the dashboard can explain itself.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let env = config.status();
        let timezone = config.timezone()?;
        let services = match config.credentials() {
            Ok(creds) => {
                let http = Client::builder()
                    .user_agent(concat!("post-ig/", env!("CARGO_PKG_VERSION")))
                    .build()?;
                Some(Services {
                    assets: Arc::new(CloudinaryClient::new(http.clone(), &creds)),
                    publisher: Arc::new(GraphClient::new(http, &creds)),
                })
            }
            Err(e) => {
                tracing::warn!("{e}; publishing is disabled");
                None
            }
        };
        Ok(Self::new(env, timezone, services))
    }

    pub fn services(&self) -> std::result::Result<&Services, ConfigError> {
        self.services
            .as_ref()
            .ok_or_else(|| ConfigError::Missing(self.env.missing.clone()))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(dashboard::page))
        .route("/api/publish", post(publish))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "status": "ok", "ready": state.env.ready }))
}

#[derive(Default)]
struct PublishForm {
    image: Option<ImageFile>,
    caption: Option<String>,
    publish_at: Option<String>,
    location_id: Option<String>,
}

async fn read_form(multipart: &mut Multipart) -> Result<PublishForm> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        AppError::Validation(format!("Invalid form data: {}", e.body_text()))
    };
    let mut form = PublishForm::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                // Only a part carrying a filename counts as a file.
                let Some(file_name) = field.file_name().map(str::to_string) else {
                    continue;
                };
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(invalid)?;
                if file_name.is_empty() && bytes.is_empty() {
                    continue;
                }
                form.image = Some(ImageFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "caption" => form.caption = Some(field.text().await.map_err(invalid)?),
            "publishAt" => form.publish_at = Some(field.text().await.map_err(invalid)?),
            "locationId" => form.location_id = Some(field.text().await.map_err(invalid)?),
            _ => {}
        }
    }
    Ok(form)
}

async fn publish(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PublishResponse>> {
    let services = state.services()?;
    let mut multipart = multipart
        .map_err(|e| AppError::Validation(format!("Invalid form data: {}", e.body_text())))?;
    let form = read_form(&mut multipart).await?;

    let image = form
        .image
        .ok_or_else(|| AppError::Validation(IMAGE_REQUIRED.into()))?;
    let params = PublishParams::new(
        form.caption.unwrap_or_default(),
        form.publish_at,
        form.location_id,
    );
    params
        .validate()
        .map_err(|m| AppError::Validation(m.into()))?;
    let publish_at = params
        .publish_at_iso(state.timezone)
        .map_err(|m| AppError::Validation(m.into()))?;

    let asset = services.assets.upload(&image).await?;
    tracing::debug!(public_id = ?asset.public_id, "Image uploaded");
    let request = ScheduleRequest {
        caption: params.caption,
        image_url: asset.secure_url,
        publish_at,
        location_id: params.location_id,
    };
    let creation = services
        .publisher
        .schedule_post(&request)
        .await
        .map_err(AppError::Schedule)?;

    tracing::info!(
        creation_id = %creation.id,
        scheduled = request.publish_at.is_some(),
        "Publish request completed"
    );
    Ok(Json(PublishResponse {
        success: true,
        creation,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assets::UploadedAsset;
    use crate::error::{ProviderError, UploadError};
    use crate::graph::{CreationResult, PublishingQuota};
    use crate::posts::ScheduledPost;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    pub(crate) struct FakeAssets {
        pub uploads: Mutex<Vec<ImageFile>>,
        pub fail: bool,
    }

    #[async_trait]
    impl AssetHost for FakeAssets {
        async fn upload(
            &self,
            image: &ImageFile,
        ) -> std::result::Result<UploadedAsset, UploadError> {
            self.uploads.lock().unwrap().push(image.clone());
            if self.fail {
                return Err(UploadError::Provider {
                    status: 400,
                    message: "Invalid image file".into(),
                });
            }
            Ok(UploadedAsset {
                secure_url: "https://res.example/post-ig/abc.png".into(),
                public_id: Some("post-ig/abc".into()),
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct FakePublisher {
        pub requests: Mutex<Vec<ScheduleRequest>>,
        pub posts: Vec<ScheduledPost>,
        pub quota: Option<PublishingQuota>,
        pub fail_schedule: Option<String>,
        pub fail_posts: Option<String>,
        pub fail_quota: Option<String>,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn schedule_post(
            &self,
            request: &ScheduleRequest,
        ) -> std::result::Result<CreationResult, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(message) = &self.fail_schedule {
                return Err(ProviderError::Api(message.clone()));
            }
            Ok(CreationResult {
                id: "17890000000000001".into(),
                media_id: request.publish_at.is_none().then(|| "17900000000000002".into()),
                scheduled_publish_time: request.publish_at.clone(),
            })
        }

        async fn fetch_scheduled_posts(
            &self,
        ) -> std::result::Result<Vec<ScheduledPost>, ProviderError> {
            match &self.fail_posts {
                Some(message) => Err(ProviderError::Api(message.clone())),
                None => Ok(self.posts.clone()),
            }
        }

        async fn fetch_publishing_limit(
            &self,
        ) -> std::result::Result<Option<PublishingQuota>, ProviderError> {
            match &self.fail_quota {
                Some(message) => Err(ProviderError::Api(message.clone())),
                None => Ok(self.quota.clone()),
            }
        }
    }

    pub(crate) fn ready_state(
        assets: Arc<FakeAssets>,
        publisher: Arc<FakePublisher>,
    ) -> Arc<AppState> {
        Arc::new(AppState::new(
            EnvStatus {
                ready: true,
                missing: vec![],
            },
            Tz::UTC,
            Some(Services { assets, publisher }),
        ))
    }

    const BOUNDARY: &str = "post-ig-test-boundary";

    fn multipart_body(fields: &[(&str, &str)], image: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn post_publish(state: Arc<AppState>, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/publish")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn immediate_publish_uploads_then_schedules() {
        let assets = Arc::new(FakeAssets::default());
        let publisher = Arc::new(FakePublisher::default());
        let png = vec![0x89u8; 1024];
        let (status, body) = post_publish(
            ready_state(assets.clone(), publisher.clone()),
            multipart_body(&[("caption", "Hello")], Some(&png)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["creation"]["id"], "17890000000000001");

        let uploads = assets.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].bytes.len(), 1024);
        assert_eq!(uploads[0].content_type.as_deref(), Some("image/png"));

        let requests = publisher.requests.lock().unwrap();
        assert_eq!(
            *requests,
            vec![ScheduleRequest {
                caption: "Hello".into(),
                image_url: "https://res.example/post-ig/abc.png".into(),
                publish_at: None,
                location_id: None,
            }]
        );
    }

    #[tokio::test]
    async fn scheduled_publish_passes_iso_time_and_location() {
        let assets = Arc::new(FakeAssets::default());
        let publisher = Arc::new(FakePublisher::default());
        let (status, body) = post_publish(
            ready_state(assets, publisher.clone()),
            multipart_body(
                &[
                    ("caption", "Later"),
                    ("publishAt", "2026-10-20T14:30"),
                    ("locationId", "110843418940484"),
                ],
                Some(b"png"),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["creation"]["scheduledPublishTime"],
            "2026-10-20T14:30:00.000Z"
        );
        let requests = publisher.requests.lock().unwrap();
        assert_eq!(requests[0].publish_at.as_deref(), Some("2026-10-20T14:30:00.000Z"));
        assert_eq!(requests[0].location_id.as_deref(), Some("110843418940484"));
    }

    #[tokio::test]
    async fn missing_image_is_rejected_before_any_call() {
        let assets = Arc::new(FakeAssets::default());
        let publisher = Arc::new(FakePublisher::default());
        let (status, body) = post_publish(
            ready_state(assets.clone(), publisher.clone()),
            multipart_body(&[("caption", "Hello"), ("image", "not-a-file")], None),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Image file is required." }));
        assert!(assets.uploads.lock().unwrap().is_empty());
        assert!(publisher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_caption_is_rejected() {
        let assets = Arc::new(FakeAssets::default());
        let (status, body) = post_publish(
            ready_state(assets.clone(), Arc::new(FakePublisher::default())),
            multipart_body(&[("caption", "")], Some(b"png")),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Caption is required.");
        assert!(assets.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_config_wins_over_validation() {
        let state = Arc::new(AppState::new(
            EnvStatus {
                ready: false,
                missing: vec!["INSTAGRAM_ACCESS_TOKEN", "CLOUDINARY_API_SECRET"],
            },
            Tz::UTC,
            None,
        ));
        let (status, body) = post_publish(state, multipart_body(&[], None)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            "Missing required configuration: INSTAGRAM_ACCESS_TOKEN, CLOUDINARY_API_SECRET"
        );
    }

    #[tokio::test]
    async fn upload_failure_skips_schedule() {
        let assets = Arc::new(FakeAssets {
            fail: true,
            ..FakeAssets::default()
        });
        let publisher = Arc::new(FakePublisher::default());
        let (status, body) = post_publish(
            ready_state(assets, publisher.clone()),
            multipart_body(&[("caption", "Hello")], Some(b"png")),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Media upload error (400): Invalid image file");
        assert!(publisher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_message_is_surfaced() {
        let publisher = Arc::new(FakePublisher {
            fail_schedule: Some("The scheduled publish time is too soon.".into()),
            ..FakePublisher::default()
        });
        let (status, body) = post_publish(
            ready_state(Arc::new(FakeAssets::default()), publisher),
            multipart_body(
                &[("caption", "Hello"), ("publishAt", "2026-10-18T12:01")],
                Some(b"png"),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({ "error": "The scheduled publish time is too soon." })
        );
    }

    #[tokio::test]
    async fn unparseable_publish_time_is_rejected_before_upload() {
        let assets = Arc::new(FakeAssets::default());
        let publisher = Arc::new(FakePublisher::default());
        let (status, body) = post_publish(
            ready_state(assets.clone(), publisher.clone()),
            multipart_body(
                &[("caption", "Hello"), ("publishAt", "next tuesday")],
                Some(b"png"),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Publish time is not a valid date." }));
        assert!(assets.uploads.lock().unwrap().is_empty());
        assert!(publisher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn healthz_reports_readiness() {
        let state = ready_state(
            Arc::new(FakeAssets::default()),
            Arc::new(FakePublisher::default()),
        );
        let response = router(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "status": "ok", "ready": true }));
    }
}
