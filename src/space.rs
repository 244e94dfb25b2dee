//! Parameter space declarations
//!
//! Each strategy variant declares its named numeric dimensions together with
//! inclusive bounds. The trailing-stop dimensions are searched jointly with the
//! strategy ones; [`ParameterSpace::split`] separates the two groups again.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::strategies::StrategyVariant;

/// Slack allowed when snapping a value that drifted past a bound through float rounding
const BOUND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionKind {
    Integer,
    Float,
}

/// Which artifact section a dimension belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamGroup {
    Strategy,
    TrailingStop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: &'static str,
    pub low: f64,
    pub high: f64,
    pub kind: DimensionKind,
    pub group: ParamGroup,
}

impl Dimension {
    const fn int(name: &'static str, low: i64, high: i64, group: ParamGroup) -> Self {
        Dimension {
            name,
            low: low as f64,
            high: high as f64,
            kind: DimensionKind::Integer,
            group,
        }
    }

    const fn float(name: &'static str, low: f64, high: f64, group: ParamGroup) -> Self {
        Dimension {
            name,
            low,
            high,
            kind: DimensionKind::Float,
            group,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    fn sample(&self, rng: &mut Pcg64) -> f64 {
        match self.kind {
            DimensionKind::Integer => rng.gen_range(self.low as i64..=self.high as i64) as f64,
            DimensionKind::Float => rng.gen_range(self.low..=self.high),
        }
    }

    /// Map a value inside the bounds onto [0, 1]
    fn encode(&self, value: f64) -> f64 {
        if self.high > self.low {
            (value - self.low) / (self.high - self.low)
        } else {
            0.0
        }
    }

    /// Map a unit coordinate back into the bounds, rounding integer dimensions
    fn decode(&self, u: f64) -> f64 {
        let raw = self.low + u.clamp(0.0, 1.0) * (self.high - self.low);
        match self.kind {
            DimensionKind::Integer => raw.round().clamp(self.low, self.high),
            DimensionKind::Float => raw.clamp(self.low, self.high),
        }
    }
}

const TRAILING_STOP_DIMENSIONS: [Dimension; 2] = [
    Dimension::float("atr_multiplier", 1.0, 4.0, ParamGroup::TrailingStop),
    Dimension::int("atr_period", 10, 20, ParamGroup::TrailingStop),
];

const LARRY_WILLIAMS_DIMENSIONS: [Dimension; 4] = [
    Dimension::int("ma_period", 6, 15, ParamGroup::Strategy),
    Dimension::int("lookback_period", 10, 30, ParamGroup::Strategy),
    Dimension::float("trend_threshold", 0.3, 0.7, ParamGroup::Strategy),
    Dimension::int("volatility_period", 10, 20, ParamGroup::Strategy),
];

const MACD_CROSSOVER_DIMENSIONS: [Dimension; 4] = [
    Dimension::int("fast_period", 8, 16, ParamGroup::Strategy),
    Dimension::int("slow_period", 20, 35, ParamGroup::Strategy),
    Dimension::int("signal_period", 6, 12, ParamGroup::Strategy),
    Dimension::int("volatility_period", 10, 20, ParamGroup::Strategy),
];

/// Concrete value per dimension name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector(BTreeMap<String, f64>);

impl ParameterVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of an integer dimension
    pub fn get_usize(&self, name: &str) -> Result<usize> {
        let value = self
            .get(name)
            .ok_or_else(|| TunerError::range(name, "missing"))?;
        if value < 0.0 || value.fract() != 0.0 {
            return Err(TunerError::range(
                name,
                format!("{} is not a non-negative integer", value),
            ));
        }
        Ok(value as usize)
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| TunerError::range(name, "missing"))
    }

    /// Short human readable form used in logs
    pub fn describe(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| {
                if v.fract() == 0.0 {
                    format!("{}={}", k, v)
                } else {
                    format!("{}={:.4}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<(String, f64)> for ParameterVector {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        ParameterVector(iter.into_iter().collect())
    }
}

/// Declared dimensions of one strategy variant. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    variant: StrategyVariant,
    dimensions: Vec<Dimension>,
}

/// Declared search space of a strategy variant, trailing-stop dimensions included
pub fn bounds_for(variant: StrategyVariant) -> ParameterSpace {
    let strategy_dims: &[Dimension] = match variant {
        StrategyVariant::LarryWilliams => &LARRY_WILLIAMS_DIMENSIONS,
        StrategyVariant::MacdCrossover => &MACD_CROSSOVER_DIMENSIONS,
    };

    let dimensions = strategy_dims
        .iter()
        .chain(TRAILING_STOP_DIMENSIONS.iter())
        .cloned()
        .collect();

    ParameterSpace {
        variant,
        dimensions,
    }
}

impl ParameterSpace {
    pub fn variant(&self) -> StrategyVariant {
        self.variant
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Draw `n` vectors uniformly inside the bounds. Same seed, same vectors.
    pub fn sample(&self, seed: u64, n: usize) -> Vec<ParameterVector> {
        let mut rng = Pcg64::seed_from_u64(seed);
        self.sample_with(&mut rng, n)
    }

    pub fn sample_with(&self, rng: &mut Pcg64, n: usize) -> Vec<ParameterVector> {
        (0..n)
            .map(|_| {
                self.dimensions
                    .iter()
                    .map(|d| (d.name.to_string(), d.sample(rng)))
                    .collect()
            })
            .collect()
    }

    /// Mid-point of every dimension (integers rounded)
    pub fn default_vector(&self) -> ParameterVector {
        self.decode(&vec![0.5; self.dimensions.len()])
    }

    /// Validate a vector against the declared bounds and cross-field invariants.
    ///
    /// Values that overshoot a bound by float rounding only are snapped onto it and
    /// near-integral values of integer dimensions are rounded. Anything else outside
    /// the declared space is rejected.
    pub fn clamp_or_reject(&self, vector: &ParameterVector) -> Result<ParameterVector> {
        for (name, _) in vector.iter() {
            if self.dimension(name).is_none() {
                return Err(TunerError::range(
                    name,
                    format!("not a dimension of {}", self.variant),
                ));
            }
        }

        self.check_invariants(vector)?;

        let mut clamped = ParameterVector::new();
        for dim in &self.dimensions {
            let value = vector
                .get(dim.name)
                .ok_or_else(|| TunerError::range(dim.name, "missing"))?;

            if !value.is_finite() {
                return Err(TunerError::range(dim.name, format!("{} is not finite", value)));
            }

            let mut value = value;
            if dim.kind == DimensionKind::Integer {
                let rounded = value.round();
                if (value - rounded).abs() > BOUND_EPSILON {
                    return Err(TunerError::range(
                        dim.name,
                        format!("{} is not an integer", value),
                    ));
                }
                value = rounded;
            }

            if value < dim.low - BOUND_EPSILON || value > dim.high + BOUND_EPSILON {
                return Err(TunerError::range(
                    dim.name,
                    format!("{} outside [{}, {}]", value, dim.low, dim.high),
                ));
            }

            clamped.insert(dim.name, value.clamp(dim.low, dim.high));
        }

        Ok(clamped)
    }

    /// Cross-field constraints that bounds alone cannot express
    fn check_invariants(&self, vector: &ParameterVector) -> Result<()> {
        match self.variant {
            StrategyVariant::MacdCrossover => {
                let fast = vector.get_f64("fast_period")?;
                let slow = vector.get_f64("slow_period")?;
                if fast >= slow {
                    return Err(TunerError::range(
                        "fast_period",
                        format!("fast_period ({}) must be < slow_period ({})", fast, slow),
                    ));
                }
            }
            StrategyVariant::LarryWilliams => {}
        }
        Ok(())
    }

    /// Encode a vector onto the unit hypercube, in declaration order
    pub fn encode(&self, vector: &ParameterVector) -> Vec<f64> {
        self.dimensions
            .iter()
            .map(|d| d.encode(vector.get(d.name).unwrap_or(d.low)))
            .collect()
    }

    /// Decode a unit-hypercube point. Always lands inside the bounds.
    pub fn decode(&self, point: &[f64]) -> ParameterVector {
        self.dimensions
            .iter()
            .zip(point.iter().chain(std::iter::repeat(&0.0)))
            .map(|(d, &u)| (d.name.to_string(), d.decode(u)))
            .collect()
    }

    /// Split a joint vector into its (strategy, trailing stop) groups
    pub fn split(&self, vector: &ParameterVector) -> (ParameterVector, ParameterVector) {
        let mut strategy = ParameterVector::new();
        let mut trailing = ParameterVector::new();
        for dim in &self.dimensions {
            if let Some(value) = vector.get(dim.name) {
                match dim.group {
                    ParamGroup::Strategy => strategy.insert(dim.name, value),
                    ParamGroup::TrailingStop => trailing.insert(dim.name, value),
                }
            }
        }
        (strategy, trailing)
    }

    /// Inverse of [`ParameterSpace::split`]
    pub fn join(&self, strategy: &ParameterVector, trailing: &ParameterVector) -> ParameterVector {
        strategy
            .iter()
            .chain(trailing.iter())
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_table() {
        let lw = bounds_for(StrategyVariant::LarryWilliams);
        assert_eq!(lw.len(), 6);
        let ma = lw.dimension("ma_period").unwrap();
        assert_eq!((ma.low, ma.high, ma.kind), (6.0, 15.0, DimensionKind::Integer));
        let tt = lw.dimension("trend_threshold").unwrap();
        assert_eq!((tt.low, tt.high, tt.kind), (0.3, 0.7, DimensionKind::Float));

        let macd = bounds_for(StrategyVariant::MacdCrossover);
        assert_eq!(macd.len(), 6);
        let slow = macd.dimension("slow_period").unwrap();
        assert_eq!((slow.low, slow.high), (20.0, 35.0));
        let atr_mult = macd.dimension("atr_multiplier").unwrap();
        assert_eq!(atr_mult.group, ParamGroup::TrailingStop);
    }

    #[test]
    fn test_sample_is_deterministic_and_in_bounds() {
        let space = bounds_for(StrategyVariant::LarryWilliams);
        let a = space.sample(42, 200);
        let b = space.sample(42, 200);
        assert_eq!(a, b);

        for vector in &a {
            for dim in space.dimensions() {
                let v = vector.get(dim.name).unwrap();
                assert!(dim.contains(v), "{} = {} out of bounds", dim.name, v);
                if dim.kind == DimensionKind::Integer {
                    assert_eq!(v.fract(), 0.0);
                }
            }
        }

        assert_ne!(space.sample(7, 5), space.sample(8, 5));
    }

    #[test]
    fn test_clamp_or_reject_rejects_fast_not_below_slow() {
        let space = bounds_for(StrategyVariant::MacdCrossover);
        let mut vector = space.default_vector();
        vector.insert("fast_period", 16.0);
        vector.insert("slow_period", 16.0);

        match space.clamp_or_reject(&vector) {
            Err(TunerError::Range { dimension, message }) => {
                assert_eq!(dimension, "fast_period");
                assert!(message.contains("slow_period"));
            }
            other => panic!("expected range error, got {:?}", other),
        }
    }

    #[test]
    fn test_clamp_or_reject_bounds() {
        let space = bounds_for(StrategyVariant::LarryWilliams);
        let base = space.default_vector();

        let mut too_high = base.clone();
        too_high.insert("ma_period", 16.0);
        assert!(space.clamp_or_reject(&too_high).is_err());

        let mut fractional = base.clone();
        fractional.insert("lookback_period", 12.5);
        assert!(space.clamp_or_reject(&fractional).is_err());

        let mut drifted = base.clone();
        drifted.insert("trend_threshold", 0.7 + 1e-12);
        let clamped = space.clamp_or_reject(&drifted).unwrap();
        assert_eq!(clamped.get("trend_threshold"), Some(0.7));

        let mut missing = base.clone();
        missing.0.remove("atr_period");
        assert!(space.clamp_or_reject(&missing).is_err());

        let extra = base.clone().with("rsi_period", 14.0);
        assert!(space.clamp_or_reject(&extra).is_err());
    }

    #[test]
    fn test_unit_round_trip_stays_in_bounds() {
        let space = bounds_for(StrategyVariant::MacdCrossover);
        let decoded = space.decode(&[1.5, -0.2, 0.5, 0.49, 0.33, 1.0]);
        for dim in space.dimensions() {
            assert!(dim.contains(decoded.get(dim.name).unwrap()));
        }
        assert_eq!(decoded.get("fast_period"), Some(16.0));
        assert_eq!(decoded.get("slow_period"), Some(20.0));

        let vector = space.sample(1, 1).remove(0);
        let again = space.decode(&space.encode(&vector));
        for dim in space.dimensions() {
            assert!((again.get(dim.name).unwrap() - vector.get(dim.name).unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_split_and_join() {
        let space = bounds_for(StrategyVariant::LarryWilliams);
        let vector = space.default_vector();
        let (strategy, trailing) = space.split(&vector);
        assert_eq!(strategy.len(), 4);
        assert_eq!(trailing.len(), 2);
        assert!(strategy.get("volatility_period").is_some());
        assert!(trailing.get("atr_period").is_some());
        assert_eq!(space.join(&strategy, &trailing), vector);
    }
}
