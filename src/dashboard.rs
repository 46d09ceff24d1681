//! The dashboard page: environment status, quota, upload form and the list of
//! scheduled posts. Data is fetched fresh on every load.

use crate::config::EnvStatus;
use crate::error::AppError;
use crate::form::render_form;
use crate::graph::PublishingQuota;
use crate::posts::{ScheduledPost, TimestampValue, display_time, render_posts};
use crate::server::AppState;
use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use maud::{DOCTYPE, Markup, PreEscaped, html};
use std::sync::Arc;

const CSS: &str = include_str!("../static/dashboard.css");
const JS: &str = include_str!("../static/form.js");

#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    pub env: EnvStatus,
    pub posts: Vec<ScheduledPost>,
    pub quota: Option<PublishingQuota>,
    pub error: Option<String>,
}

/// Posts and quota are fetched concurrently and fail together: on any error
/// both are left empty and a single message is kept for the banner.
pub async fn load(state: &AppState) -> DashboardData {
    let mut data = DashboardData {
        env: state.env.clone(),
        ..DashboardData::default()
    };
    let Ok(services) = state.services() else {
        return data;
    };

    let publisher = &services.publisher;
    match tokio::try_join!(
        publisher.fetch_scheduled_posts(),
        publisher.fetch_publishing_limit()
    ) {
        Ok((posts, quota)) => {
            tracing::debug!(
                posts = posts.len(),
                quota = quota.is_some(),
                "Dashboard data loaded"
            );
            data.posts = posts;
            data.quota = quota;
        }
        Err(e) => {
            let error = AppError::Fetch(e);
            tracing::warn!(error = %error, "Dashboard fetch failed");
            data.error = Some(error.to_string());
        }
    }
    data
}

pub async fn page(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data = load(&state).await;
    let markup = render(&data, Utc::now(), state.timezone);
    (
        [(header::CACHE_CONTROL, "no-store, max-age=0")],
        Html(markup.into_string()),
    )
}

pub fn render(data: &DashboardData, now: DateTime<Utc>, tz: Tz) -> Markup {
    let env = &data.env;
    let content = html! {
        header.site-header {
            h1 { "Instagram scheduler" }
        }
        main.dashboard {
            (env_banner(env))
            @if let Some(error) = &data.error {
                div.banner.banner-error role="alert" { (error) }
            }
            @if let Some(quota) = &data.quota {
                (quota_banner(quota, now, tz))
            }
            (render_form(env))
            (render_posts(&data.posts, now, tz))
        }
        script { (PreEscaped(JS)) }
    };
    base_document("Instagram scheduler", content)
}

fn base_document(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                (content)
            }
        }
    }
}

fn env_banner(env: &EnvStatus) -> Markup {
    html! {
        @if !env.ready {
            div.banner.banner-warning role="alert" {
                p { "Publishing is disabled until the following settings are provided:" }
                ul.missing-keys {
                    @for key in &env.missing {
                        li { code { (key) } }
                    }
                }
            }
        }
    }
}

fn quota_banner(quota: &PublishingQuota, now: DateTime<Utc>, tz: Tz) -> Markup {
    let reset = quota
        .reset_time
        .clone()
        .map(TimestampValue::Text)
        .and_then(|value| display_time(Some(&value), now, tz));
    html! {
        div.banner.banner-quota {
            strong { "Publishing quota: " }
            (quota.quota_usage) " of " (quota.quota_total) " used, "
            (quota.quota_remaining) " remaining"
            @if let Some(reset) = reset {
                " (resets " (reset.relative) ")"
            }
        }
    }
}
