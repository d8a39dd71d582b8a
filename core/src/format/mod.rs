// Dashboard formatting helpers
//
// Pure functions: absent or malformed input renders a fixed fallback string
// instead of failing.

pub mod duration;
pub mod number;
pub mod time;

pub use duration::{f_duration, f_duration_simple, parse_iso_duration};
pub use number::{f_delta, f_number, f_percent};
pub use time::{
    f_date, f_date_time, f_relative_time, f_time, f_timestamp, f_to_now, parse_timestamp,
};
