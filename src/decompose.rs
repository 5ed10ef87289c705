//! Classical additive seasonal decomposition of a regularly spaced series

use crate::error::AnalysisError;

/// `observed = trend + seasonal + residual`. Trend and residual are undefined
/// for the first and last half period.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub period: usize,
    pub observed: Vec<f64>,
    pub trend: Vec<Option<f64>>,
    pub seasonal: Vec<f64>,
    pub residual: Vec<Option<f64>>,
}

/// Split `series` into trend, seasonal and residual components
///
/// The trend is a centred moving average over one period (a 2×period average
/// when the period is even). The seasonal component is the mean detrended
/// value at each position of the cycle, shifted to sum to zero.
pub fn seasonal_decompose(series: &[f64], period: usize) -> crate::Result<Decomposition> {
    if period < 2 {
        return Err(AnalysisError::Computation(
            "seasonal period must be at least 2".to_string(),
        ));
    }
    if series.len() < 2 * period {
        return Err(AnalysisError::InsufficientData {
            what: "seasonal decomposition".to_string(),
            needed: 2 * period,
            found: series.len(),
        });
    }

    let trend = centred_moving_average(series, period);

    let mut position_sums = vec![0.0; period];
    let mut position_counts = vec![0usize; period];
    for (t, (value, level)) in series.iter().zip(&trend).enumerate() {
        if let Some(level) = level {
            position_sums[t % period] += value - level;
            position_counts[t % period] += 1;
        }
    }
    let mut pattern: Vec<f64> = position_sums
        .iter()
        .zip(&position_counts)
        .map(|(sum, &count)| if count > 0 { sum / count as f64 } else { 0.0 })
        .collect();
    let offset = pattern.iter().sum::<f64>() / period as f64;
    pattern.iter_mut().for_each(|p| *p -= offset);

    let seasonal: Vec<f64> = (0..series.len()).map(|t| pattern[t % period]).collect();
    let residual = series
        .iter()
        .zip(&trend)
        .zip(&seasonal)
        .map(|((value, level), season)| level.map(|level| value - level - season))
        .collect();

    Ok(Decomposition {
        period,
        observed: series.to_vec(),
        trend,
        seasonal,
        residual,
    })
}

fn centred_moving_average(series: &[f64], period: usize) -> Vec<Option<f64>> {
    let weights: Vec<f64> = if period % 2 == 0 {
        let mut w = vec![1.0 / period as f64; period + 1];
        w[0] /= 2.0;
        w[period] /= 2.0;
        w
    } else {
        vec![1.0 / period as f64; period]
    };
    let half = weights.len() / 2;

    (0..series.len())
        .map(|t| {
            if t < half || t + half >= series.len() {
                return None;
            }
            let window = &series[t - half..=t + half];
            Some(window.iter().zip(&weights).map(|(v, w)| v * w).sum())
        })
        .collect()
}
