//! 台北时间（UTC+8，无夏令时）

use chrono::{DateTime, FixedOffset, Offset, Utc};

const TAIPEI_OFFSET_SECS: i32 = 8 * 3600;

pub fn taipei_offset() -> FixedOffset {
    FixedOffset::east_opt(TAIPEI_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&taipei_offset())
}
