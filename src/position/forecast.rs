//! Spread forecaster (§4.5 "Forecasting and mean-reversion", advisory
//! only — never gates a trade or a health transition). Exponential
//! smoothing is the same shape as `backtest_v2`'s EWMA calibration curve,
//! generalized here from price calibration to a per-pair spread series.

use std::collections::VecDeque;

pub const MAX_SAMPLES: usize = 500;
const SMOOTHING_ALPHA: f64 = 0.3;
const SEASONALITY_STRENGTH_THRESHOLD: f64 = 0.3;
const MEAN_REVERSION_Z_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastResult {
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonalityResult {
    pub period_hours: f64,
    pub strength: f64,
    pub phase_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanReversionSignal {
    pub z_score: f64,
    pub reverting: bool,
}

/// Rolling per-pair spread series feeding the forecaster.
pub struct SpreadForecaster {
    samples: VecDeque<f64>,
    sample_interval_hours: f64,
}

impl SpreadForecaster {
    pub fn new(sample_interval_hours: f64) -> Self {
        Self { samples: VecDeque::with_capacity(MAX_SAMPLES), sample_interval_hours }
    }

    pub fn record(&mut self, spread: f64) {
        if self.samples.len() >= MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(spread);
    }

    fn ewma(&self) -> Option<f64> {
        let mut iter = self.samples.iter();
        let mut level = *iter.next()?;
        for &sample in iter {
            level = SMOOTHING_ALPHA * sample + (1.0 - SMOOTHING_ALPHA) * level;
        }
        Some(level)
    }

    fn stddev(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        let variance =
            self.samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (self.samples.len() - 1) as f64;
        variance.sqrt()
    }

    /// `forecast(horizon_h)`: EWMA point estimate with ±1.96σ bounds that
    /// widen proportionally to the forecast horizon.
    pub fn forecast(&self, horizon_hours: f64) -> Option<ForecastResult> {
        let point = self.ewma()?;
        let sigma = self.stddev();
        let horizon_periods = if self.sample_interval_hours > 0.0 { (horizon_hours / self.sample_interval_hours).max(1.0) } else { 1.0 };
        let width = 1.96 * sigma * horizon_periods.sqrt();
        Some(ForecastResult { point, lower: point - width, upper: point + width })
    }

    /// `detect_seasonality`: autocorrelation at lag = period / sample
    /// interval for each candidate period in {1h, 8h}; the dominant
    /// pattern above the strength threshold is reported.
    pub fn detect_seasonality(&self) -> Option<SeasonalityResult> {
        if self.sample_interval_hours <= 0.0 {
            return None;
        }
        let candidates = [1.0_f64, 8.0];
        let mut best: Option<SeasonalityResult> = None;
        for &period_hours in &candidates {
            let lag = (period_hours / self.sample_interval_hours).round() as usize;
            if lag == 0 || lag >= self.samples.len() {
                continue;
            }
            let strength = autocorrelation(&self.samples, lag);
            if strength.abs() > SEASONALITY_STRENGTH_THRESHOLD {
                let phase_hours = (lag as f64 * self.sample_interval_hours) % period_hours;
                if best.map(|b| strength.abs() > b.strength.abs()).unwrap_or(true) {
                    best = Some(SeasonalityResult { period_hours, strength, phase_hours });
                }
            }
        }
        best
    }

    /// `mean_reversion`: |z| > 2 vs. the rolling mean signals reversion.
    pub fn mean_reversion(&self) -> Option<MeanReversionSignal> {
        if self.samples.len() < 2 {
            return None;
        }
        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        let sigma = self.stddev();
        let last = *self.samples.back()?;
        if sigma == 0.0 {
            return Some(MeanReversionSignal { z_score: 0.0, reverting: false });
        }
        let z = (last - mean) / sigma;
        Some(MeanReversionSignal { z_score: z, reverting: z.abs() > MEAN_REVERSION_Z_THRESHOLD })
    }
}

fn autocorrelation(samples: &VecDeque<f64>, lag: usize) -> f64 {
    let n = samples.len();
    if lag >= n {
        return 0.0;
    }
    let data: Vec<f64> = samples.iter().copied().collect();
    let mean = data.iter().sum::<f64>() / n as f64;
    let variance: f64 = data.iter().map(|x| (x - mean).powi(2)).sum();
    if variance == 0.0 {
        return 0.0;
    }
    let covariance: f64 = (0..n - lag).map(|i| (data[i] - mean) * (data[i + lag] - mean)).sum();
    covariance / variance
}
