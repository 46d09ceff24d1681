use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

pub const MAX_CAPTION_LENGTH: usize = 2200;
pub const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024; // 8MB

pub const IMAGE_REQUIRED: &str = "Image file is required.";
pub const CAPTION_REQUIRED: &str = "Caption is required.";
pub const CAPTION_TOO_LONG: &str = "Caption must be 2200 characters or fewer.";
pub const INVALID_PUBLISH_AT: &str = "Publish time is not a valid date.";

/// Text fields of a publish request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishParams {
    pub caption: String,
    /// A `datetime-local` value or an RFC 3339 instant.
    pub publish_at: Option<String>,
    pub location_id: Option<String>,
}

/// Empty strings are treated as absent.
pub fn optional(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn validate_caption(caption: &str) -> Result<(), &'static str> {
    if caption.is_empty() {
        return Err(CAPTION_REQUIRED);
    }
    if caption.chars().count() > MAX_CAPTION_LENGTH {
        return Err(CAPTION_TOO_LONG);
    }
    Ok(())
}

impl PublishParams {
    pub fn new(caption: String, publish_at: Option<String>, location_id: Option<String>) -> Self {
        Self {
            caption,
            publish_at: optional(publish_at),
            location_id: optional(location_id),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        validate_caption(&self.caption)
    }

    /// The publish time as an ISO-8601 UTC string with millisecond precision.
    pub fn publish_at_iso(&self, tz: Tz) -> Result<Option<String>, &'static str> {
        self.publish_at
            .as_deref()
            .map(|raw| to_iso(raw, tz).ok_or(INVALID_PUBLISH_AT))
            .transpose()
    }
}

/// Interprets `raw` as an RFC 3339 instant, or as wall-clock time in `tz`.
pub fn to_iso(raw: &str, tz: Tz) -> Option<String> {
    let raw = raw.trim();
    let instant = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            let naive = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())?;
            // Ambiguous wall-clock times resolve to the earlier instant; times
            // skipped by a forward shift move forward by the hour that was skipped.
            tz.from_local_datetime(&naive)
                .earliest()
                .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())?
                .with_timezone(&Utc)
        }
    };
    Some(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}
