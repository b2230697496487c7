use std::sync::LazyLock;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_|]").unwrap());
static UNWANTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{M}\p{N}\- ]").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").unwrap());

/// Folds a name typed at the counter or heard by the assistant into a form that
/// compares equal regardless of case, punctuation and spacing.
pub fn sanitize(input: &str) -> String {
    let s = UNDERSCORES.replace_all(input, " ");
    let s = UNWANTED.replace_all(&s, "");

    SPACES.replace_all(s.trim(), " ").to_lowercase()
}

/// Emails are stored lower-cased and trimmed.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accepts `null`, a missing field or `""` as no id. Browsers send empty strings
/// for unselected dropdowns.
pub fn blank_uuid<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;

    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Uuid::parse_str(s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Start of the shop's current day, in server local time.
pub fn start_of_today() -> DateTime<Utc> {
    let today = Local::now().date_naive();

    Local
        .from_local_datetime(&today.and_time(NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| today.and_time(NaiveTime::MIN).and_utc())
}

/// Inclusive UTC range covering whole calendar days. The end runs through the
/// last millisecond of `end`.
pub fn day_range(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = start.and_time(NaiveTime::MIN).and_utc();
    let to = end
        .checked_add_days(Days::new(1))
        .map(|next| next.and_time(NaiveTime::MIN).and_utc() - chrono::Duration::milliseconds(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    (from, to)
}
