//! 时间工具函数
//!
//! Repository 层只接收 `i64` Unix millis; 日期字段 (效期) 使用
//! `NaiveDate`, 序列化为 `YYYY-MM-DD` 以便按字典序即时间序排序.

use chrono::{DateTime, NaiveDate, Utc};

use super::{AppError, AppResult};

/// Current instant as Unix millis
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Unix millis → UTC datetime (fallback to epoch on out-of-range)
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(|| DateTime::UNIX_EPOCH)
}

/// 解析日期字符串 (YYYY-MM-DD)
pub fn parse_date(date: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("Invalid date format: {}", date)))
}

/// Whole days from `today` until `date` (negative when past)
pub fn days_until(today: NaiveDate, date: NaiveDate) -> i64 {
    (date - today).num_days()
}

/// Today's date in UTC
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_until_is_signed() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 4).unwrap();
        let future = NaiveDate::from_ymd_opt(2026, 9, 3).unwrap();
        let past = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(days_until(today, future), 30);
        assert_eq!(days_until(today, past), -3);
        assert_eq!(days_until(today, today), 0);
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("2026-02-30").is_err());
        assert!(parse_date("not-a-date").is_err());
        assert!(parse_date("2026-08-04").is_ok());
    }
}
