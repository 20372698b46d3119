//! Local-time conversions between the admin form format and the stored format.
//!
//! Sessions are scheduled in the school's wall-clock time, so everything here
//! works on naive local datetimes.

use chrono::{Local, NaiveDateTime};

/// Stored format, also what SQLite's `datetime()` produces.
pub const DB_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// `<input type="datetime-local">` format.
pub const FORM_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// `2025-09-15 09:00:00` → `2025-09-15T09:00`. Empty stays empty.
pub fn db_time_to_form(db_time: &str) -> String {
    if db_time.is_empty() {
        return String::new();
    }
    db_time.chars().take(16).collect::<String>().replacen(' ', "T", 1)
}

/// `2025-09-15T09:00` → `2025-09-15 09:00:00`.
///
/// Returns `None` for blank or unparseable input. A full `YYYY-MM-DD HH:MM:SS`
/// value is accepted as-is.
pub fn form_time_to_db(form_time: &str) -> Option<String> {
    let form_time = form_time.trim();
    if form_time.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(form_time, FORM_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(form_time, DB_FORMAT))
        .or_else(|_| NaiveDateTime::parse_from_str(form_time, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|dt| dt.format(DB_FORMAT).to_string())
}

/// Current local wall-clock time in the stored format.
pub fn local_now() -> String {
    Local::now().naive_local().format(DB_FORMAT).to_string()
}
