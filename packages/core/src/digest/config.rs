//! Configuration for digest computation

use crate::digest::types::Counts;

/// Decimal places used when rounding each percentage metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    pub change_precision: Counts<u8>,
    pub share_precision: u8,
}

impl MetricsConfig {
    /// Upper bound on any configured precision.
    pub const MAX_PRECISION: u8 = 10;

    pub fn with_precision(precision: u8) -> Self {
        let precision = precision.min(Self::MAX_PRECISION);
        Self {
            change_precision: Counts::splat(precision),
            share_precision: precision,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self::with_precision(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_precision_is_two_places() {
        let config = MetricsConfig::default();
        assert_eq!(config.change_precision, Counts::splat(2));
        assert_eq!(config.share_precision, 2);
    }

    #[test]
    fn configs_compare_by_value() {
        fn same<T: Eq>(a: T, b: T) -> bool {
            a == b
        }
        assert!(same(MetricsConfig::default(), MetricsConfig::with_precision(2)));
        assert!(!same(MetricsConfig::default(), MetricsConfig::with_precision(3)));
    }

    #[test]
    fn precision_is_capped() {
        assert_eq!(MetricsConfig::with_precision(40).share_precision, MetricsConfig::MAX_PRECISION);
    }
}
