use chrono::NaiveDate;

use crate::schema::DailyWatermark;

/// Reset the watermark when it belongs to a different calendar day.
///
/// Platform step counters restart at midnight, so carrying yesterday's
/// watermark into today would swallow the first steps of the day.
pub fn normalize(watermark: DailyWatermark, today: NaiveDate) -> DailyWatermark {
    if watermark.as_of_date != today {
        DailyWatermark::starting(today)
    } else {
        watermark
    }
}
