//! Synthetic EM trace generation and analysis
//!
//! The analyzer produces two traces over the same time base: a clean 10 Hz
//! sine ("normal") and a half-amplitude copy with additive Gaussian noise
//! ("crash"). [`SignalAnalyzer::analyze`] reduces a trace to a handful of
//! statistics used to tell the two apart.
//!
//! The SNR figure treats the configured noise threshold as the noise
//! amplitude, so it is a modelling shortcut rather than a measured ratio.

use std::f64::consts::PI;

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::config::SignalConfig;
use crate::error::{ProbeError, ProbeResult};

/// Frequency of the normal-operation sine
pub const SIGNAL_FREQUENCY_HZ: f64 = 10.0;

/// Amplitude factor applied to the normal trace in a crash trace
pub const CRASH_ATTENUATION: f64 = 0.5;

/// Sampled trace with its time base
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    time: Vec<f64>,
    samples: Vec<f64>,
}

impl Trace {
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalAnalysis {
    pub positive_mean: f64,
    pub negative_mean: f64,
    pub peak_to_peak: f64,
    pub rms: f64,
    pub snr_db: f64,
}

/// Side-by-side report of a normal and a crash trace
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalComparison {
    pub normal: SignalAnalysis,
    pub crash: SignalAnalysis,
    /// crash rms / normal rms
    pub rms_ratio: f64,
    /// crash snr - normal snr
    pub snr_delta_db: f64,
    /// crash peak-to-peak - normal peak-to-peak
    pub peak_to_peak_delta: f64,
}

/// Gaussian noise source using the Box-Muller transform
pub struct NoiseGenerator<R: Rng> {
    std_dev: f64,
    rng: R,
    cached: Option<f64>,
}

impl<R: Rng> NoiseGenerator<R> {
    pub fn new(std_dev: f64, rng: R) -> Self {
        Self {
            std_dev,
            rng,
            cached: None,
        }
    }

    /// Next sample of N(0, std_dev²)
    pub fn next_sample(&mut self) -> f64 {
        if let Some(cached) = self.cached.take() {
            return cached * self.std_dev;
        }

        let u1: f64 = self.rng.gen();
        let u2: f64 = self.rng.gen();
        // Avoid ln(0)
        let u1 = u1.max(1e-10);

        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;
        self.cached = Some(r * theta.sin());
        r * theta.cos() * self.std_dev
    }
}

pub struct SignalAnalyzer {
    config: SignalConfig,
    time: Vec<f64>,
}

impl SignalAnalyzer {
    /// Build the analyzer and its time base `t[i] = i / sample_rate`
    pub fn new(config: SignalConfig) -> ProbeResult<Self> {
        config.validate()?;
        let rate = f64::from(config.sample_rate_hz);
        let time = (0..config.sample_count()).map(|i| i as f64 / rate).collect();
        Ok(Self { config, time })
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Clean sine, identical on every call
    pub fn generate_normal_signal(&self) -> Trace {
        let samples = self
            .time
            .iter()
            .map(|t| (2.0 * PI * SIGNAL_FREQUENCY_HZ * t).sin())
            .collect();
        Trace {
            time: self.time.clone(),
            samples,
        }
    }

    /// Attenuated sine plus noise drawn from `rng`
    pub fn generate_crash_signal<R: Rng>(&self, rng: R) -> Trace {
        let mut noise = NoiseGenerator::new(self.config.noise_threshold, rng);
        let mut trace = self.generate_normal_signal();
        for sample in &mut trace.samples {
            *sample = CRASH_ATTENUATION * *sample + noise.next_sample();
        }
        trace
    }

    /// Crash trace reproducible from `seed`
    pub fn generate_crash_signal_seeded(&self, seed: u64) -> Trace {
        self.generate_crash_signal(ChaCha8Rng::seed_from_u64(seed))
    }

    /// Reduce a trace to its statistics
    ///
    /// Requires a positive noise threshold and at least one sample on each
    /// side of the trigger band.
    pub fn analyze(&self, trace: &Trace) -> ProbeResult<SignalAnalysis> {
        let noise = self.config.noise_threshold;
        if noise <= 0.0 {
            return Err(ProbeError::invalid_config(
                "noise_threshold must be greater than zero to compute SNR",
            ));
        }

        let trigger = self.config.trigger_threshold;
        let samples = trace.samples();
        let positive_mean = segment_mean(samples.iter().copied().filter(|&x| x > trigger)).ok_or(
            ProbeError::EmptySegment {
                segment: "positive",
                threshold: trigger,
            },
        )?;
        let negative_mean = segment_mean(samples.iter().copied().filter(|&x| x < -trigger)).ok_or(
            ProbeError::EmptySegment {
                segment: "negative",
                threshold: trigger,
            },
        )?;

        let power = mean_power(samples);
        let analysis = SignalAnalysis {
            positive_mean,
            negative_mean,
            peak_to_peak: peak_to_peak(samples),
            rms: power.sqrt(),
            snr_db: 10.0 * (power / (noise * noise)).log10(),
        };
        debug!("Signal analysis over {} samples: {:?}", samples.len(), analysis);
        Ok(analysis)
    }

    /// Generate and analyze both traces
    pub fn compare(&self, seed: u64) -> ProbeResult<SignalComparison> {
        let normal = self.analyze(&self.generate_normal_signal())?;
        let crash = self.analyze(&self.generate_crash_signal_seeded(seed))?;
        Ok(SignalComparison {
            normal,
            crash,
            rms_ratio: crash.rms / normal.rms,
            snr_delta_db: crash.snr_db - normal.snr_db,
            peak_to_peak_delta: crash.peak_to_peak - normal.peak_to_peak,
        })
    }
}

fn segment_mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), x| (sum + x, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Mean of the squared samples; zero for an empty slice
pub fn mean_power(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|x| x * x).sum::<f64>() / samples.len() as f64
}

pub fn rms(samples: &[f64]) -> f64 {
    mean_power(samples).sqrt()
}

/// `max - min`; zero for an empty slice
pub fn peak_to_peak(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &x| (min.min(x), max.max(x)));
    max - min
}
