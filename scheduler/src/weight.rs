//! Priorities and the priority-to-weight table.
//!
//! Priorities are nice values: the smaller the priority, the larger the
//! weight and the share of the processor.

use crate::error::ConfigError;

/// The most favoured priority.
pub const PRI_MIN: i8 = -20;
/// The priority threads start with.
pub const PRI_DEFAULT: i8 = 0;
/// The least favoured priority.
pub const PRI_MAX: i8 = 19;

/// The weight of the default priority.
pub const WEIGHT_0: u64 = 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PriorityRange {
    pub min: i8,
    pub default: i8,
    pub max: i8,
}

impl PriorityRange {
    pub fn new(min: i8, default: i8, max: i8) -> Result<Self, ConfigError> {
        if min > max || default < min || default > max {
            return Err(ConfigError::InvalidRange { min, default, max });
        }
        Ok(PriorityRange { min, default, max })
    }

    pub fn contains(&self, priority: i8) -> bool {
        (self.min..=self.max).contains(&priority)
    }

    /// Number of priorities in the range.
    pub fn count(&self) -> usize {
        (i16::from(self.max) - i16::from(self.min) + 1) as usize
    }

    fn index(&self, priority: i8) -> usize {
        (i16::from(priority) - i16::from(self.min)) as usize
    }
}

impl Default for PriorityRange {
    fn default() -> Self {
        PriorityRange {
            min: PRI_MIN,
            default: PRI_DEFAULT,
            max: PRI_MAX,
        }
    }
}

const FRACTION_BITS: u32 = 32;

/// How weights change from one priority to the next.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WeightCurve {
    /// `weight = base * (numerator / denominator) ^ (-priority)`
    Geometric {
        base: u64,
        numerator: u64,
        denominator: u64,
    },

    /// `weight = base - step * priority`
    Linear { base: i64, step: i64 },
}

impl Default for WeightCurve {
    /// Every priority step changes the weight by 25%.
    fn default() -> Self {
        WeightCurve::Geometric {
            base: WEIGHT_0,
            numerator: 5,
            denominator: 4,
        }
    }
}

impl WeightCurve {
    fn weight(&self, priority: i8) -> Result<u64, ConfigError> {
        match *self {
            WeightCurve::Geometric {
                base,
                numerator,
                denominator,
            } => {
                if numerator == 0 || denominator == 0 {
                    return Err(ConfigError::InvalidRatio {
                        numerator,
                        denominator,
                    });
                }
                let exponent = u32::from(priority.unsigned_abs());
                let (up, down) = if priority <= 0 {
                    (numerator, denominator)
                } else {
                    (denominator, numerator)
                };
                // One step at a time in 32.32 fixed point, so only weights
                // that do not fit in a u64 overflow.
                let overflow = ConfigError::WeightOverflow { priority };
                let mut weight = u128::from(base) << FRACTION_BITS;
                for _ in 0..exponent {
                    weight = weight
                        .checked_mul(u128::from(up))
                        .ok_or(overflow.clone())?
                        / u128::from(down);
                    if weight >> FRACTION_BITS > u128::from(u64::MAX) {
                        return Err(overflow);
                    }
                }
                let weight = u64::try_from(weight >> FRACTION_BITS).map_err(|_| overflow)?;
                positive(priority, i128::from(weight))
            }
            WeightCurve::Linear { base, step } => {
                let weight = i128::from(base) - i128::from(step) * i128::from(priority);
                positive(priority, weight)
            }
        }
    }
}

fn positive(priority: i8, weight: i128) -> Result<u64, ConfigError> {
    if weight <= 0 {
        return Err(ConfigError::NonPositiveWeight {
            priority,
            weight: i64::try_from(weight).unwrap_or(i64::MIN),
        });
    }
    u64::try_from(weight).map_err(|_| ConfigError::WeightOverflow { priority })
}

/// The immutable priority-to-weight mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightTable {
    range: PriorityRange,
    weights: Vec<u64>,
}

impl WeightTable {
    pub fn new(range: PriorityRange, curve: WeightCurve) -> Result<Self, ConfigError> {
        let range = PriorityRange::new(range.min, range.default, range.max)?;
        let weights = (range.min..=range.max)
            .map(|priority| curve.weight(priority))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WeightTable { range, weights })
    }

    /// Builds a table from one weight per priority, starting at `range.min`.
    pub fn from_weights(range: PriorityRange, weights: &[i64]) -> Result<Self, ConfigError> {
        let range = PriorityRange::new(range.min, range.default, range.max)?;
        if weights.len() != range.count() {
            return Err(ConfigError::TableSize {
                expected: range.count(),
                found: weights.len(),
            });
        }
        let weights = (range.min..=range.max)
            .zip(weights)
            .map(|(priority, &weight)| positive(priority, i128::from(weight)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WeightTable { range, weights })
    }

    pub fn range(&self) -> PriorityRange {
        self.range
    }

    pub fn weight(&self, priority: i8) -> Option<u64> {
        if !self.range.contains(priority) {
            return None;
        }
        Some(self.weights[self.range.index(priority)])
    }

    /// The weight of the default priority, which advances its virtual
    /// runtime at the speed of real time.
    pub fn reference_weight(&self) -> u64 {
        self.weights[self.range.index(self.range.default)]
    }

    /// Converts `elapsed` real time into virtual runtime for `weight`.
    ///
    /// Returns `None` when the result does not fit in a `u64`.
    pub fn scale(&self, elapsed: u64, weight: u64) -> Option<u64> {
        let scaled = u128::from(elapsed) * u128::from(self.reference_weight()) / u128::from(weight);
        u64::try_from(scaled).ok()
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        let range = PriorityRange::default();
        let weights = (range.min..=range.max)
            .map(|priority| {
                WeightCurve::default()
                    .weight(priority)
                    .unwrap_or(WEIGHT_0)
            })
            .collect();
        WeightTable { range, weights }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_table_matches_the_nice_curve() {
        let table = WeightTable::default();
        assert_eq!(table.weight(0), Some(1024));
        assert_eq!(table.weight(-1), Some(1280));
        assert_eq!(table.weight(1), Some(819));
        assert_eq!(table.weight(-20), Some(88817));
        assert_eq!(table.weight(19), Some(14));
        assert_eq!(table.weight(20), None);
        assert_eq!(table.weight(-21), None);
        assert_eq!(table.reference_weight(), 1024);
    }

    #[test]
    fn weights_decrease_with_priority() {
        let table = WeightTable::default();
        let weights: Vec<u64> = (PRI_MIN..=PRI_MAX)
            .map(|priority| table.weight(priority).unwrap())
            .collect();
        assert!(weights.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[test]
    fn heavier_priorities_reach_the_experiment_ratios() {
        // The heavier thread of each experiment is expected to run 2, 3, 4
        // and 5 times as long as a thread at priority -1.
        let table = WeightTable::default();
        let light = table.weight(-1).unwrap() as f64;
        for (priority, ratio) in [(-4, 2.0), (-6, 3.0), (-7, 4.0), (-8, 5.0)] {
            let heavy = table.weight(priority).unwrap() as f64;
            let measured = heavy / light;
            assert!(
                (measured - ratio).abs() / ratio < 0.05,
                "priority {priority}: {measured} instead of {ratio}"
            );
        }
    }

    #[test]
    fn scale_is_inverse_to_weight() {
        let table = WeightTable::default();
        assert_eq!(table.scale(1_000, 1024), Some(1_000));
        assert_eq!(table.scale(1_000, 2048), Some(500));
        assert_eq!(table.scale(1_000, 512), Some(2_000));
    }

    #[test]
    fn scale_reports_overflow() {
        let table = WeightTable::default();
        assert_eq!(table.scale(u64::MAX, 1024), Some(u64::MAX));
        assert_eq!(table.scale(u64::MAX / 2, 14), None);
    }

    #[test]
    fn geometric_curve_reaches_the_most_favoured_i8() {
        let range = PriorityRange::new(i8::MIN, 0, 0).unwrap();
        let table = WeightTable::new(range, WeightCurve::default()).unwrap();
        // 1024 * 1.25^128 is about 2.6e15.
        let heaviest = table.weight(i8::MIN).unwrap();
        assert!((2_500_000_000_000_000..2_700_000_000_000_000).contains(&heaviest));
        assert!(heaviest > table.weight(i8::MIN + 1).unwrap());
        assert_eq!(table.weight(-20), Some(88817));
        assert_eq!(table.weight(-8), Some(6103));
    }

    #[test]
    fn linear_curve() {
        let range = PriorityRange::new(-2, 0, 2).unwrap();
        let table = WeightTable::new(range, WeightCurve::Linear { base: 10, step: 3 }).unwrap();
        assert_eq!(table.weight(-2), Some(16));
        assert_eq!(table.weight(2), Some(4));
    }

    #[test]
    fn non_positive_weights_are_rejected() {
        let range = PriorityRange::new(-2, 0, 2).unwrap();
        assert_eq!(
            WeightTable::new(range, WeightCurve::Linear { base: 4, step: 2 }),
            Err(ConfigError::NonPositiveWeight {
                priority: 2,
                weight: 0
            })
        );
        assert_eq!(
            WeightTable::from_weights(range, &[5, 4, 3, -1, 1]),
            Err(ConfigError::NonPositiveWeight {
                priority: 1,
                weight: -1
            })
        );
    }

    #[test]
    fn malformed_configurations_are_rejected() {
        assert_eq!(
            PriorityRange::new(3, 0, 1),
            Err(ConfigError::InvalidRange {
                min: 3,
                default: 0,
                max: 1
            })
        );
        let range = PriorityRange::new(-1, 0, 1).unwrap();
        assert_eq!(
            WeightTable::from_weights(range, &[1, 2]),
            Err(ConfigError::TableSize {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            WeightTable::new(
                range,
                WeightCurve::Geometric {
                    base: 1,
                    numerator: 0,
                    denominator: 4
                }
            ),
            Err(ConfigError::InvalidRatio {
                numerator: 0,
                denominator: 4
            })
        );
        let wide = PriorityRange::new(-128, 0, 0).unwrap();
        assert!(matches!(
            WeightTable::new(
                wide,
                WeightCurve::Geometric {
                    base: 1024,
                    numerator: 1000,
                    denominator: 1
                }
            ),
            Err(ConfigError::WeightOverflow { .. })
        ));
    }
}
