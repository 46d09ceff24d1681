//! The upload form: local validation, the submission state machine, and the
//! request it sends to `POST /api/publish`.
//!
//! The rendered page drives the same rules from `static/form.js`; this module
//! is the authoritative model of them and the client used outside a browser.

use crate::assets::ImageFile;
use crate::config::EnvStatus;
use crate::graph::CreationResult;
use crate::params::{MAX_CAPTION_LENGTH, MAX_IMAGE_BYTES, optional, validate_caption};
use maud::{Markup, html};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const FILE_REQUIRED: &str = "Please select an image to upload.";
pub const FILE_TOO_LARGE: &str = "Image must be smaller than 8MB.";
pub const PUBLISHED: &str = "Post published successfully.";
pub const SCHEDULED: &str = "Post scheduled successfully.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMode {
    #[default]
    Immediate,
    Scheduled,
}

impl FormMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormMode::Immediate => "immediate",
            FormMode::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormPhase {
    #[default]
    Idle,
    Submitting,
}

#[derive(Debug, Clone)]
pub enum FormEvent {
    Submit,
    Succeeded(CreationResult),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
}

impl FormPhase {
    /// Transition table. `None` means the event is not accepted in this phase.
    pub fn next(self, event: &FormEvent) -> Option<FormPhase> {
        match (self, event) {
            (FormPhase::Idle, FormEvent::Submit) => Some(FormPhase::Submitting),
            (FormPhase::Submitting, FormEvent::Succeeded(_)) => Some(FormPhase::Idle),
            (FormPhase::Submitting, FormEvent::Failed(_)) => Some(FormPhase::Idle),
            _ => None,
        }
    }
}

/// What the form sends once local validation passes.
#[derive(Debug, Clone)]
pub struct Submission {
    pub image: ImageFile,
    pub caption: String,
    pub mode: FormMode,
    pub publish_at: Option<String>,
    pub location_id: Option<String>,
}

impl Submission {
    pub fn multipart(&self) -> Result<reqwest::multipart::Form, reqwest::Error> {
        let mut part = reqwest::multipart::Part::bytes(self.image.bytes.clone())
            .file_name(self.image.file_name.clone());
        if let Some(mime) = self.image.content_type.as_deref() {
            part = part.mime_str(mime)?;
        }
        let mut form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("caption", self.caption.clone());
        if let (FormMode::Scheduled, Some(at)) = (self.mode, &self.publish_at) {
            form = form.text("publishAt", at.clone());
        }
        if let Some(location) = &self.location_id {
            form = form.text("locationId", location.clone());
        }
        Ok(form)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub success: bool,
    pub creation: CreationResult,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub file: Option<ImageFile>,
    pub caption: String,
    pub mode: FormMode,
    pub publish_at: Option<String>,
    pub location_id: Option<String>,
    phase: FormPhase,
    notice: Option<Notice>,
    refresh_requested: bool,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FormPhase {
        self.phase
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// True once after a successful submission; the caller re-fetches the dashboard.
    pub fn take_refresh(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    pub fn set_mode(&mut self, mode: FormMode) {
        if mode == FormMode::Immediate {
            self.publish_at = None;
        }
        self.mode = mode;
    }

    pub fn can_submit(&self, env: &EnvStatus) -> bool {
        env.ready && self.phase == FormPhase::Idle
    }

    /// Local checks, first failure wins.
    pub fn validate(&self) -> Result<Submission, String> {
        let image = self.file.as_ref().ok_or(FILE_REQUIRED)?;
        if image.len() > MAX_IMAGE_BYTES {
            return Err(FILE_TOO_LARGE.into());
        }
        validate_caption(&self.caption)?;
        // Scheduled mode without a time is left to the provider to judge.
        Ok(Submission {
            image: image.clone(),
            caption: self.caption.clone(),
            mode: self.mode,
            publish_at: match self.mode {
                FormMode::Immediate => None,
                FormMode::Scheduled => optional(self.publish_at.clone()),
            },
            location_id: optional(self.location_id.clone()),
        })
    }

    /// Applies `event` if the current phase accepts it.
    pub fn dispatch(&mut self, event: FormEvent) -> bool {
        let Some(next) = self.phase.next(&event) else {
            tracing::debug!(phase = ?self.phase, ?event, "Ignoring form event");
            return false;
        };
        self.phase = next;
        match event {
            FormEvent::Submit => self.notice = None,
            FormEvent::Succeeded(creation) => {
                let message = if creation.scheduled_publish_time.is_some() {
                    SCHEDULED
                } else {
                    PUBLISHED
                };
                self.reset();
                self.notice = Some(Notice::Success(message.into()));
                self.refresh_requested = true;
            }
            FormEvent::Failed(message) => self.notice = Some(Notice::Error(message)),
        }
        true
    }

    fn reset(&mut self) {
        self.file = None;
        self.caption.clear();
        self.mode = FormMode::Immediate;
        self.publish_at = None;
        self.location_id = None;
    }

    /// Validates, then posts to the publish endpoint. Returns the creation on success.
    pub async fn submit(
        &mut self,
        http: &Client,
        endpoint: &str,
        env: &EnvStatus,
    ) -> Option<CreationResult> {
        if !self.can_submit(env) {
            return None;
        }
        let submission = match self.validate() {
            Ok(submission) => submission,
            Err(message) => {
                self.notice = Some(Notice::Error(message));
                return None;
            }
        };

        self.dispatch(FormEvent::Submit);
        match send(http, endpoint, &submission).await {
            Ok(creation) => {
                self.dispatch(FormEvent::Succeeded(creation.clone()));
                Some(creation)
            }
            Err(message) => {
                self.dispatch(FormEvent::Failed(message));
                None
            }
        }
    }
}

async fn send(
    http: &Client,
    endpoint: &str,
    submission: &Submission,
) -> Result<CreationResult, String> {
    let form = submission
        .multipart()
        .map_err(|e| format!("Invalid image type: {e}"))?;
    let resp = http
        .post(endpoint)
        .multipart(form)
        .send()
        .await
        .map_err(|e| format!("Failed to reach the server: {e}"))?;

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("Upload failed ({status})")));
    }
    serde_json::from_str::<PublishResponse>(&body)
        .map(|r| r.creation)
        .map_err(|e| format!("Unexpected response from server: {e}"))
}

pub fn render_form(env: &EnvStatus) -> Markup {
    let disabled = !env.ready;
    html! {
        section.upload {
            h2 { "New post" }
            form id="upload-form"
                enctype="multipart/form-data"
                data-max-bytes=(MAX_IMAGE_BYTES)
                data-max-caption=(MAX_CAPTION_LENGTH)
                data-ready=(if env.ready { "true" } else { "false" })
            {
                label {
                    "Image"
                    input type="file" name="image" accept="image/*" disabled[disabled];
                }
                label {
                    "Caption"
                    textarea name="caption" rows="4" disabled[disabled] {}
                    small.caption-count { "0/" (MAX_CAPTION_LENGTH) }
                }
                fieldset.mode {
                    legend { "When" }
                    label {
                        input type="radio" name="mode" value=(FormMode::Immediate.as_str()) checked disabled[disabled];
                        " Publish now"
                    }
                    label {
                        input type="radio" name="mode" value=(FormMode::Scheduled.as_str()) disabled[disabled];
                        " Schedule"
                    }
                }
                label.schedule-time hidden {
                    "Publish at"
                    input type="datetime-local" name="publishAt" disabled[disabled];
                }
                label {
                    "Location ID (optional)"
                    input type="text" name="locationId" disabled[disabled];
                }
                p.form-notice role="status" {}
                button type="submit" disabled[disabled] { "Submit" }
            }
        }
    }
}
