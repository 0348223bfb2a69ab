use serde::{Deserialize, Serialize};

/// Function combining testcase scores into a subtask score, or subtask
/// scores into the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Min,
    Max,
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Sum
    }
}

impl Aggregation {
    fn combine(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Aggregation::Sum => lhs + rhs,
            Aggregation::Min => lhs.min(rhs),
            Aggregation::Max => lhs.max(rhs),
        }
    }

    /// Folds `values` in iteration order. Returns `None` for an empty input,
    /// which has no defined score under any of the three functions.
    pub fn apply<I>(self, values: I) -> Option<f64>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut iter = values.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, v| self.combine(acc, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let scores = [1.0, 1.0, 0.0];
        assert_eq!(Aggregation::Sum.apply(scores.iter().copied()), Some(2.0));
        assert_eq!(Aggregation::Min.apply(scores.iter().copied()), Some(0.0));
        assert_eq!(Aggregation::Max.apply(scores.iter().copied()), Some(1.0));
    }

    #[test]
    fn single_value_is_identity() {
        for &agg in [Aggregation::Sum, Aggregation::Min, Aggregation::Max].iter() {
            assert_eq!(agg.apply(vec![0.25]), Some(0.25));
        }
    }

    #[test]
    fn empty_is_undefined() {
        assert_eq!(Aggregation::Sum.apply(Vec::new()), None);
        assert_eq!(Aggregation::Min.apply(Vec::new()), None);
        assert_eq!(Aggregation::Max.apply(Vec::new()), None);
    }

    #[test]
    fn parse_names() {
        let agg: Aggregation = serde_json::from_str("\"min\"").unwrap();
        assert_eq!(agg, Aggregation::Min);
        assert!(serde_json::from_str::<Aggregation>("\"avg\"").is_err());
        assert_eq!(Aggregation::default(), Aggregation::Sum);
    }
}
