//! Clock abstraction and timestamp formatting used in job messages and renders.

use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// Source of "now". The worker and the monitor never read the system clock directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// `now - then`, clamped at zero when clocks disagree.
pub fn elapsed_since(now: OffsetDateTime, then: OffsetDateTime) -> Duration {
    Duration::try_from(now - then).unwrap_or(Duration::ZERO)
}

pub fn format_rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

/// Due dates carry no meaningful time of day.
pub fn format_due(t: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    t.format(fmt).unwrap_or_else(|_| t.date().to_string())
}

/// e.g. "07:30 UTC, Sat 28 Jan 2012"
pub fn format_summary_time(t: OffsetDateTime) -> String {
    let fmt = format_description!(
        "[hour]:[minute] UTC, [weekday repr:short] [day] [month repr:short] [year]"
    );
    t.to_offset(time::UtcOffset::UTC)
        .format(fmt)
        .unwrap_or_else(|_| format_rfc3339(t))
}

/// e.g. "12.345 seconds"
pub fn format_elapsed(d: Duration) -> String {
    format!("{}.{:03} seconds", d.as_secs(), d.subsec_millis())
}
