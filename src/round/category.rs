//! Settlement value buckets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a settlement value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Red,
    Blue,
    Pink,
    Green,
    Yellow,
    Gradient,
}

/// Upper bounds, strictly ascending. First `value < bound` wins.
const THRESHOLDS: [(f64, Category); 5] = [
    (1.2, Category::Red),
    (2.0, Category::Blue),
    (4.0, Category::Pink),
    (8.0, Category::Green),
    (25.0, Category::Yellow),
];

impl Category {
    /// Buckets a settlement value. Values at or above the highest bound,
    /// and NaN, land in `Gradient`.
    pub fn from_value(value: f64) -> Self {
        THRESHOLDS
            .iter()
            .find(|(bound, _)| value < *bound)
            .map(|(_, category)| *category)
            .unwrap_or(Category::Gradient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Red => "red",
            Category::Blue => "blue",
            Category::Pink => "pink",
            Category::Green => "green",
            Category::Yellow => "yellow",
            Category::Gradient => "gradient",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_values_hit_every_bucket() {
        let got: Vec<_> = [1.1, 1.5, 3.0, 7.5, 20.0, 30.0]
            .into_iter()
            .map(Category::from_value)
            .collect();
        assert_eq!(
            got,
            vec![
                Category::Red,
                Category::Blue,
                Category::Pink,
                Category::Green,
                Category::Yellow,
                Category::Gradient,
            ]
        );
    }

    #[test]
    fn test_boundaries_belong_to_upper_bucket() {
        assert_eq!(Category::from_value(1.2), Category::Blue);
        assert_eq!(Category::from_value(2.0), Category::Pink);
        assert_eq!(Category::from_value(4.0), Category::Green);
        assert_eq!(Category::from_value(8.0), Category::Yellow);
        assert_eq!(Category::from_value(25.0), Category::Gradient);
    }

    #[test]
    fn test_thresholds_are_ascending() {
        assert!(THRESHOLDS.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
