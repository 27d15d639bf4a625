use std::ops::AddAssign;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    NotExecutable,
    Missed,
    Covered,
}

impl LineStatus {
    /// A `null` entry is not executable; any other entry is measurable and
    /// counts as covered only when it is a number greater than zero.
    #[must_use]
    pub fn classify(entry: &Value) -> Self {
        match entry {
            Value::Null => LineStatus::NotExecutable,
            Value::Number(n) if n.as_f64().is_some_and(|hits| hits > 0.0) => LineStatus::Covered,
            _ => LineStatus::Missed,
        }
    }
}

/// Measurable and covered line counts for a file, job, or build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineTally {
    pub measurable: u64,
    pub covered: u64,
}

impl LineTally {
    #[must_use]
    pub fn from_lines(lines: &[Value]) -> Self {
        lines
            .iter()
            .fold(LineTally::default(), |mut tally, entry| {
                match LineStatus::classify(entry) {
                    LineStatus::NotExecutable => {}
                    LineStatus::Missed => tally.measurable += 1,
                    LineStatus::Covered => {
                        tally.measurable += 1;
                        tally.covered += 1;
                    }
                }
                tally
            })
    }

    /// Percentage of measurable lines that were hit, 0 when nothing is measurable.
    #[must_use]
    pub fn rate(&self) -> f64 {
        if self.measurable == 0 {
            return 0.0;
        }
        (self.covered as f64 / self.measurable as f64) * 100.0
    }
}

impl AddAssign for LineTally {
    fn add_assign(&mut self, other: Self) {
        self.measurable += other.measurable;
        self.covered += other.covered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lines(v: Value) -> Vec<Value> {
        v.as_array().cloned().unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(LineStatus::classify(&json!(null)), LineStatus::NotExecutable);
        assert_eq!(LineStatus::classify(&json!(0)), LineStatus::Missed);
        assert_eq!(LineStatus::classify(&json!(3)), LineStatus::Covered);
        assert_eq!(LineStatus::classify(&json!(0.5)), LineStatus::Covered);
        assert_eq!(LineStatus::classify(&json!("1")), LineStatus::Missed);
    }

    #[test]
    fn test_rate_counts_only_measurable_lines() {
        let tally = LineTally::from_lines(&lines(json!([null, null, 1, null, 1, null])));
        assert_eq!(tally, LineTally { measurable: 2, covered: 2 });
        assert_eq!(tally.rate(), 100.0);

        let tally = LineTally::from_lines(&lines(json!([null, 5, 0, 0, 2])));
        assert_eq!(tally, LineTally { measurable: 4, covered: 2 });
        assert_eq!(tally.rate(), 50.0);
    }

    #[test]
    fn test_rate_is_zero_without_measurable_lines() {
        assert_eq!(LineTally::from_lines(&[]).rate(), 0.0);
        assert_eq!(LineTally::from_lines(&lines(json!([null, null]))).rate(), 0.0);
    }

    #[test]
    fn test_rate_matches_formula_across_shapes() {
        for measurable in 1..=12u64 {
            for covered in 0..=measurable {
                let mut entries = vec![Value::Null; 3];
                entries.extend((0..covered).map(|_| json!(1)));
                entries.extend((covered..measurable).map(|_| json!(0)));
                let tally = LineTally::from_lines(&entries);
                let expected = 100.0 * covered as f64 / measurable as f64;
                assert!((tally.rate() - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_tallies_aggregate() {
        let mut total = LineTally::from_lines(&lines(json!([null, null, 1, null, 1, null])));
        total += LineTally::from_lines(&lines(json!([null, null, 1, null, 0, null])));
        assert_eq!(total, LineTally { measurable: 4, covered: 3 });
        assert_eq!(total.rate(), 75.0);
    }
}
