//! Destination index naming.
//!
//! Every message is indexed into `{topic}-{yy}.{mm}.{dd}`, dated by the local
//! calendar day on which it was consumed.

use chrono::{Local, NaiveDate};

const DATE_SUFFIX_FORMAT: &str = "%y.%m.%d";

/// Index name for a topic on a given day.
///
/// ```
/// use chrono::NaiveDate;
/// use nsq_indexer_shared::index_name;
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
/// assert_eq!(index_name("orders", date), "orders-24.03.07");
/// ```
pub fn index_name(topic: &str, date: NaiveDate) -> String {
    format!("{}-{}", topic, date.format(DATE_SUFFIX_FORMAT))
}

/// Index name for a topic using today's local date.
pub fn index_name_for_today(topic: &str) -> String {
    index_name(topic, Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_zero_pads() {
        let date = NaiveDate::from_ymd_opt(2031, 1, 2).unwrap();
        assert_eq!(index_name("logs", date), "logs-31.01.02");
    }

    #[test]
    fn test_days_around_midnight_differ() {
        let before = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let after = before.succ_opt().unwrap();
        assert_eq!(index_name("orders", before), "orders-24.12.31");
        assert_eq!(index_name("orders", after), "orders-25.01.01");
    }

    #[test]
    fn test_today_has_topic_prefix() {
        let name = index_name_for_today("events");
        assert!(name.starts_with("events-"));
        assert_eq!(name.len(), "events-".len() + 8);
    }
}
