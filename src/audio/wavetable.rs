//! Single-period wave tables and pitch conversion

use std::f64::consts::PI;
use std::sync::Arc;

const TABLE_SIZE: usize = 100;
const HARMONICS: usize = 50;

/// One period of a waveform, shared cheaply between channels and voices.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveTable {
    name: Arc<str>,
    samples: Arc<[f32]>,
}

impl WaveTable {
    pub fn from_samples(name: &str, samples: Vec<f32>) -> Self {
        Self {
            name: Arc::from(name),
            samples: Arc::from(samples),
        }
    }

    pub fn sine() -> Self {
        Self::from_fn("sine", TABLE_SIZE, |x| x.sin())
    }

    /// Fourier square: the first `HARMONICS` odd partials.
    pub fn square() -> Self {
        Self::from_fn("square", TABLE_SIZE, |x| {
            (0..HARMONICS)
                .map(|i| {
                    let t = (i * 2 + 1) as f64;
                    (t * x).sin() / t
                })
                .sum()
        })
    }

    fn from_fn(name: &str, size: usize, f: impl Fn(f64) -> f64) -> Self {
        let samples = (0..size)
            .map(|index| f(index as f64 / size as f64 * PI * 2.0) as f32)
            .collect();
        Self::from_samples(name, samples)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Linearly interpolated sample at `phase` in [0, 1).
    pub fn sample(&self, phase: f64) -> f32 {
        let len = self.samples.len();
        if len == 0 {
            return 0.0;
        }

        let position = phase.rem_euclid(1.0) * len as f64;
        let index = position as usize % len;
        let next = (index + 1) % len;
        let frac = (position - position.floor()) as f32;

        self.samples[index] + (self.samples[next] - self.samples[index]) * frac
    }
}

impl Default for WaveTable {
    fn default() -> Self {
        Self::square()
    }
}

/// Frequency in Hz of a (possibly fractional) semitone offset from `reference`.
pub fn pitch_to_frequency(pitch: f64, reference: f64) -> f64 {
    reference * 2.0_f64.powf(pitch / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pitch_to_frequency() {
        assert_relative_eq!(pitch_to_frequency(0.0, 440.0), 440.0, epsilon = 1e-9);
        assert_relative_eq!(pitch_to_frequency(12.0, 440.0), 880.0, epsilon = 1e-9);
        assert_relative_eq!(pitch_to_frequency(-12.0, 440.0), 220.0, epsilon = 1e-9);
        // quarter tone
        assert_relative_eq!(
            pitch_to_frequency(0.5, 440.0),
            440.0 * 2.0_f64.powf(1.0 / 24.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_presets() {
        let sine = WaveTable::sine();
        assert_eq!(sine.len(), 100);
        assert_eq!(sine.sample(0.0), 0.0);
        assert_relative_eq!(sine.sample(0.25), 1.0, epsilon = 1e-6);

        let square = WaveTable::square();
        assert_eq!(square.name(), "square");
        assert!(square.sample(0.25) > 0.7);
        assert!(square.sample(0.75) < -0.7);
    }

    #[test]
    fn test_sample_wraps_phase() {
        let table = WaveTable::from_samples("ramp", vec![0.0, 1.0]);
        assert_relative_eq!(table.sample(0.25), 0.5, epsilon = 1e-9);
        assert_relative_eq!(table.sample(1.25), 0.5, epsilon = 1e-9);
        assert_relative_eq!(table.sample(0.75), 0.5, epsilon = 1e-9);
    }
}
