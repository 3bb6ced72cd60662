use chrono::{NaiveDate, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
