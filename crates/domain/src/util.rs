use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Fixed-precision rounding for monetary math; precision is decimal places.
pub fn fix_num(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_num_rounds_to_given_precision() {
        assert_eq!(fix_num(1.005 * 100.0, 2), 100.5);
        assert_eq!(fix_num(0.123_456_789, 8), 0.123_456_79);
        assert_eq!(fix_num(10.0 / 3.0, 2), 3.33);
    }

    #[test]
    fn uuid_v7_has_no_dashes() {
        let id = uuid_v7_without_dashes();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
