//! Scheduled posts as mirrored from the publishing provider, and their rendering.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use maud::{Markup, html};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

pub const EMPTY_PLACEHOLDER: &str = "No scheduled posts yet";

/// A timestamp the provider may send as an ISO string, any other parseable
/// string, or Unix seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl TimestampValue {
    pub fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            TimestampValue::Seconds(secs) => Utc.timestamp_opt(*secs, 0).single(),
            TimestampValue::Fractional(secs) => from_fractional(*secs),
            TimestampValue::Text(text) => parse_text(text),
        }
    }
}

fn from_fractional(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    // Graph API style: 2026-10-18T14:30:00+0000
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    text.parse::<f64>().ok().and_then(from_fractional)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ScheduledPost {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub scheduled_publish_time: Option<TimestampValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: Option<TimestampValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub status_code: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_published: Option<bool>,
    #[serde(default)]
    pub permalink: Option<String>,
}

/// A field of an unexpected shape becomes `None` instead of failing the
/// whole post list.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring malformed post field");
            Ok(None)
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ScheduledPost {
    pub fn status_label(&self) -> String {
        non_empty(&self.status_code)
            .or_else(|| non_empty(&self.status))
            .map(str::to_string)
            .unwrap_or_else(|| {
                if self.is_published == Some(true) {
                    "PUBLISHED".to_string()
                } else {
                    "SCHEDULED".to_string()
                }
            })
    }

    pub fn preview_url(&self) -> Option<&str> {
        non_empty(&self.thumbnail_url).or_else(|| non_empty(&self.media_url))
    }
}

/// Absolute and relative renderings of one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTime {
    pub iso: String,
    pub absolute: String,
    pub relative: String,
}

pub fn display_time(
    value: Option<&TimestampValue>,
    now: DateTime<Utc>,
    tz: Tz,
) -> Option<DisplayTime> {
    let at = value?.parse()?;
    Some(DisplayTime {
        iso: at.to_rfc3339(),
        absolute: at.with_timezone(&tz).format("%b %-d, %Y, %-I:%M %p %Z").to_string(),
        relative: relative(at, now),
    })
}

const UNITS: [(&str, i64); 6] = [
    ("year", 365 * 24 * 3600),
    ("month", 30 * 24 * 3600),
    ("day", 24 * 3600),
    ("hour", 3600),
    ("minute", 60),
    ("second", 1),
];

/// "in 3 days" / "2 hours ago", using the largest whole unit.
pub fn relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = at.signed_duration_since(now).num_seconds();
    let magnitude = delta.abs();
    let Some((unit, n)) = UNITS
        .iter()
        .find(|(_, secs)| magnitude >= *secs)
        .map(|(unit, secs)| (*unit, magnitude / secs))
    else {
        return "now".to_string();
    };
    let plural = if n == 1 { "" } else { "s" };
    if delta > 0 {
        format!("in {n} {unit}{plural}")
    } else {
        format!("{n} {unit}{plural} ago")
    }
}

fn render_time(label: &str, time: Option<DisplayTime>) -> Markup {
    html! {
        @if let Some(shown) = time {
            p.post-time {
                span.post-time-label { (label) " " }
                time datetime=(shown.iso) { (shown.absolute) }
                " "
                span.post-time-relative { "(" (shown.relative) ")" }
            }
        }
    }
}

pub fn render_posts(posts: &[ScheduledPost], now: DateTime<Utc>, tz: Tz) -> Markup {
    html! {
        section.scheduled-posts {
            h2 { "Scheduled posts" }
            @if posts.is_empty() {
                p.empty-state { (EMPTY_PLACEHOLDER) }
            } @else {
                ul.post-list {
                    @for post in posts {
                        (render_post(post, now, tz))
                    }
                }
            }
        }
    }
}

fn render_post(post: &ScheduledPost, now: DateTime<Utc>, tz: Tz) -> Markup {
    let label = post.status_label();
    html! {
        li.post-card data-post-id=(post.id) {
            @if let Some(url) = post.preview_url() {
                img.post-thumb src=(url) alt="" loading="lazy";
            }
            div.post-body {
                span class={ "post-status status-" (label.to_lowercase()) } { (label) }
                p.post-caption {
                    @match non_empty(&post.caption) {
                        Some(caption) => { (caption) }
                        None => { em { "No caption" } }
                    }
                }
                (render_time("Scheduled for", display_time(post.scheduled_publish_time.as_ref(), now, tz)))
                (render_time("Created", display_time(post.timestamp.as_ref(), now, tz)))
                @if let Some(link) = non_empty(&post.permalink) {
                    a.post-link href=(link) target="_blank" rel="noopener" { "View post" }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn status_prefers_status_code_then_status_then_flag() {
        let mut post = ScheduledPost {
            id: "1".into(),
            status_code: Some("FINISHED".into()),
            status: Some("ignored".into()),
            is_published: Some(true),
            ..Default::default()
        };
        assert_eq!(post.status_label(), "FINISHED");

        post.status_code = Some("".into());
        assert_eq!(post.status_label(), "ignored");

        post.status = None;
        assert_eq!(post.status_label(), "PUBLISHED");

        post.is_published = None;
        assert_eq!(post.status_label(), "SCHEDULED");
    }

    #[test]
    fn parses_all_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 21, 9, 30, 0).unwrap();
        let shapes = [
            TimestampValue::Text("2026-10-21T09:30:00Z".into()),
            TimestampValue::Text("2026-10-21T09:30:00.000Z".into()),
            TimestampValue::Text("2026-10-21T09:30:00+0000".into()),
            TimestampValue::Text("2026-10-21T11:30:00+02:00".into()),
            TimestampValue::Text(expected.timestamp().to_string()),
            TimestampValue::Seconds(expected.timestamp()),
            TimestampValue::Fractional(expected.timestamp() as f64),
        ];
        for shape in shapes {
            assert_eq!(shape.parse(), Some(expected), "{shape:?}");
        }
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let post: ScheduledPost = serde_json::from_str(
            r#"{"id":"9","scheduled_publish_time":1792575000,"timestamp":"2026-10-18T10:00:00+0000"}"#,
        )
        .unwrap();
        assert_eq!(
            post.scheduled_publish_time,
            Some(TimestampValue::Seconds(1792575000))
        );
        assert!(post.timestamp.unwrap().parse().is_some());
    }

    #[test]
    fn odd_field_shapes_do_not_fail_the_list() {
        let posts: Vec<ScheduledPost> = serde_json::from_str(
            r#"[
                {"id":"1","timestamp":{"date":"2026-10-18"},"status_code":404,"is_published":"yes"},
                {"id":"2","scheduled_publish_time":[1792575000],"status":null,"caption":"ok"}
            ]"#,
        )
        .unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].timestamp, None);
        assert_eq!(posts[0].status_code, None);
        assert_eq!(posts[0].is_published, None);
        assert_eq!(posts[0].status_label(), "SCHEDULED");
        assert_eq!(posts[1].scheduled_publish_time, None);
        assert_eq!(posts[1].caption.as_deref(), Some("ok"));

        let html = render_posts(&posts, now(), Tz::UTC).into_string();
        assert!(html.contains(r#"data-post-id="1""#));
        assert!(!html.contains("Scheduled for"));
    }

    #[test]
    fn unparseable_timestamps_are_omitted() {
        let bad = TimestampValue::Text("next tuesday".into());
        assert_eq!(display_time(Some(&bad), now(), Tz::UTC), None);
        assert_eq!(display_time(None, now(), Tz::UTC), None);
    }

    #[test]
    fn relative_wording() {
        let n = now();
        assert_eq!(relative(n + chrono::Duration::days(3), n), "in 3 days");
        assert_eq!(relative(n - chrono::Duration::days(2), n), "2 days ago");
        assert_eq!(relative(n + chrono::Duration::hours(1), n), "in 1 hour");
        assert_eq!(relative(n - chrono::Duration::minutes(45), n), "45 minutes ago");
        assert_eq!(relative(n, n), "now");
    }

    #[test]
    fn absolute_uses_display_timezone() {
        let value = TimestampValue::Text("2026-10-21T09:30:00Z".into());
        let utc = display_time(Some(&value), now(), Tz::UTC).unwrap();
        assert_eq!(utc.absolute, "Oct 21, 2026, 9:30 AM UTC");
        assert_eq!(utc.relative, "in 2 days");

        let berlin = display_time(Some(&value), now(), Tz::Europe__Berlin).unwrap();
        assert_eq!(berlin.absolute, "Oct 21, 2026, 11:30 AM CEST");
    }

    #[test]
    fn empty_list_renders_placeholder() {
        let html = render_posts(&[], now(), Tz::UTC).into_string();
        assert!(html.contains(EMPTY_PLACEHOLDER));
        assert!(!html.contains("post-card"));
    }

    #[test]
    fn renders_posts_in_given_order_with_escaping() {
        let posts = vec![
            ScheduledPost {
                id: "b".into(),
                caption: Some("<b>second</b>".into()),
                scheduled_publish_time: Some(TimestampValue::Text("garbage".into())),
                ..Default::default()
            },
            ScheduledPost {
                id: "a".into(),
                caption: Some("first".into()),
                is_published: Some(true),
                thumbnail_url: Some("https://cdn.example/a.jpg".into()),
                ..Default::default()
            },
        ];
        let html = render_posts(&posts, now(), Tz::UTC).into_string();
        let b = html.find(r#"data-post-id="b""#).unwrap();
        let a = html.find(r#"data-post-id="a""#).unwrap();
        assert!(b < a);
        assert!(html.contains("&lt;b&gt;second&lt;/b&gt;"));
        assert!(html.contains("PUBLISHED"));
        assert!(html.contains("https://cdn.example/a.jpg"));
        assert!(!html.contains("Scheduled for"));
    }
}
