use chrono::{DateTime, Local};

/// Format a capture time as a log line timestamp, `YYYY-MM-DD HH:MM:SS.mmm`
#[inline]
pub(crate) fn format_timestamp(at: &DateTime<Local>) -> String {
  at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Format a capture time as a rotation date stamp, `YYYYMMDD`
#[inline]
pub(crate) fn date_stamp(at: &DateTime<Local>) -> String {
  at.format("%Y%m%d").to_string()
}
