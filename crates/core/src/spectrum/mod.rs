use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{
    component::{FrameInfo, Transformer},
    Result, SampleType, SignalPipeError, Stream, StreamShape,
};

const ONSET_GAIN: f32 = 12.0;
const ONSET_THRESHOLD: f32 = 0.6;
const MIN_ONSET_INTERVAL: f32 = 0.2;

/// Number of values [`SpectralFeatures`] writes per output sample.
pub const FEATURE_COUNT: usize = 3;

/// Feature set of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralFrame {
    pub time: f32,
    pub rms: f32,
    /// Normalised [0, 1] spectral centroid where 1.0 corresponds to the
    /// Nyquist frequency.
    pub centroid: f32,
    /// Positive jump in level relative to the previous frame, scaled to
    /// [0, 1].
    pub onset: f32,
}

impl SpectralFrame {
    fn values(&self) -> [f64; FEATURE_COUNT] {
        [self.rms as f64, self.centroid as f64, self.onset as f64]
    }
}

/// Aggregate of a whole signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralSummary {
    pub sample_rate: f64,
    pub frames: usize,
    pub duration_seconds: f64,
    pub mean_rms: f32,
    pub peak_rms: f32,
    pub mean_centroid: f32,
    pub onsets: usize,
    pub tempo_bpm: Option<f32>,
}

/// Windowed-FFT feature extractor. Each output sample holds `rms`,
/// `centroid` and `onset` of the current input frame, with all input
/// dimensions mixed down to mono.
pub struct SpectralFeatures {
    mono: Vec<f32>,
    last_rms: f32,
    fft: Option<FftResources>,
}

impl SpectralFeatures {
    pub fn new() -> Self {
        Self {
            mono: Vec::new(),
            last_rms: 0.0,
            fft: None,
        }
    }

    /// Shape of the feature stream produced for `input` framed in blocks of
    /// `frame_size` samples.
    pub fn output_shape(input: &StreamShape, frame_size: usize) -> StreamShape {
        StreamShape::new(
            FEATURE_COUNT,
            SampleType::Float,
            input.sample_rate / frame_size.max(1) as f64,
        )
    }

    /// Analyses one block of mono samples.
    pub fn analyse(&mut self, time: f32, samples: &[f32], sample_rate: f64) -> Result<SpectralFrame> {
        if samples.len() < 2 {
            return Err(SignalPipeError::InvalidInput(
                "analysis requires blocks with at least two samples",
            ));
        }

        let rms = compute_rms(samples);
        let onset = ((rms - self.last_rms).max(0.0) * ONSET_GAIN).clamp(0.0, 1.0);
        self.last_rms = rms;

        let centroid_hz = self.compute_spectral_centroid(samples, sample_rate as f32)?;
        let nyquist = (sample_rate as f32).max(1.0) * 0.5;

        Ok(SpectralFrame {
            time,
            rms,
            centroid: (centroid_hz / nyquist).clamp(0.0, 1.0),
            onset,
        })
    }

    /// Splits `samples` into `frame_size` blocks and aggregates their
    /// features. A trailing partial block shorter than two samples is
    /// ignored.
    pub fn summarize(samples: &[f32], sample_rate: f64, frame_size: usize) -> Result<SpectralSummary> {
        if sample_rate <= 0.0 {
            return Err(SignalPipeError::InvalidInput("sample rate must be positive"));
        }
        if frame_size < 2 {
            return Err(SignalPipeError::InvalidInput("frame size must be at least two"));
        }

        let mut features = Self::new();
        let mut summary = SpectralSummary {
            sample_rate,
            duration_seconds: samples.len() as f64 / sample_rate,
            ..Default::default()
        };
        let mut onset_times: Vec<f32> = Vec::new();
        let mut rms_sum = 0.0;
        let mut centroid_sum = 0.0;

        for (index, block) in samples.chunks(frame_size).enumerate() {
            if block.len() < 2 {
                break;
            }
            let time = (index * frame_size) as f32 / sample_rate as f32;
            let frame = features.analyse(time, block, sample_rate)?;

            summary.frames += 1;
            summary.peak_rms = summary.peak_rms.max(frame.rms);
            rms_sum += frame.rms;
            centroid_sum += frame.centroid;

            if frame.onset >= ONSET_THRESHOLD
                && onset_times
                    .last()
                    .map(|last| time - last >= MIN_ONSET_INTERVAL)
                    .unwrap_or(true)
            {
                onset_times.push(time);
            }
        }

        if summary.frames > 0 {
            summary.mean_rms = rms_sum / summary.frames as f32;
            summary.mean_centroid = centroid_sum / summary.frames as f32;
        }
        summary.onsets = onset_times.len();
        summary.tempo_bpm = estimate_tempo(&onset_times);
        Ok(summary)
    }

    fn compute_spectral_centroid(&mut self, samples: &[f32], sample_rate: f32) -> Result<f32> {
        let len = samples.len();
        let fft = self.prepare_fft(len)?;

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let bin_hz = sample_rate / len as f32;

        for (i, bin) in fft.spectrum.iter().enumerate() {
            let magnitude = bin.norm();
            magnitude_sum += magnitude;
            weighted_sum += magnitude * (i as f32 * bin_hz);
        }

        if magnitude_sum <= f32::EPSILON {
            Ok(0.0)
        } else {
            Ok(weighted_sum / magnitude_sum)
        }
    }

    fn prepare_fft(&mut self, size: usize) -> Result<&mut FftResources> {
        if self.fft.as_ref().map(|fft| fft.size) != Some(size) {
            let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
            self.fft = Some(FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            });
        }

        self.fft
            .as_mut()
            .ok_or_else(|| SignalPipeError::msg("fft plan missing"))
    }
}

impl Default for SpectralFeatures {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for SpectralFeatures {
    fn name(&self) -> &str {
        "spectral-features"
    }

    fn transform_enter(
        &mut self,
        input: &StreamShape,
        output: &StreamShape,
        _extra: &[StreamShape],
    ) -> Result<()> {
        if input.dim == 0 || input.sample_rate <= 0.0 {
            return Err(SignalPipeError::InvalidInput(
                "spectral features need a sampled input stream",
            ));
        }
        if output.dim != FEATURE_COUNT {
            return Err(SignalPipeError::config(format!(
                "spectral features write {FEATURE_COUNT} dimensions, output has {}",
                output.dim
            )));
        }
        self.last_rms = 0.0;
        Ok(())
    }

    fn transform(
        &mut self,
        info: &FrameInfo,
        input: &Stream,
        output: &mut Stream,
        _extra: &[Stream],
    ) -> Result<()> {
        let count = if info.frame_num == 0 {
            input.num()
        } else {
            info.frame_num.min(input.num())
        };

        let dim = input.dim();
        self.mono.clear();
        self.mono.extend((0..count).map(|index| {
            let sum: f64 = (0..dim).map(|d| input.value(index, d)).sum();
            (sum / dim as f64) as f32
        }));

        let mono = std::mem::take(&mut self.mono);
        let frame = self.analyse(info.time as f32, &mono, input.sample_rate());
        self.mono = mono;
        let frame = frame?;

        if output.num() == 0 {
            output.resize(1);
        }
        let values = frame.values();
        for index in 0..output.num() {
            for (d, value) in values.iter().enumerate().take(output.dim()) {
                output.set_value(index, d, *value);
            }
        }
        Ok(())
    }

    fn transform_flush(&mut self) -> Result<()> {
        self.fft = None;
        Ok(())
    }
}

impl fmt::Debug for SpectralFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralFeatures")
            .field("last_rms", &self.last_rms)
            .field("fft", &self.fft)
            .finish()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn estimate_tempo(onsets: &[f32]) -> Option<f32> {
    let intervals: Vec<f32> = onsets
        .windows(2)
        .map(|window| window[1] - window[0])
        .filter(|interval| *interval > f32::EPSILON)
        .collect();
    if intervals.is_empty() {
        return None;
    }

    let average = intervals.iter().sum::<f32>() / intervals.len() as f32;
    (average > 0.0).then(|| 60.0 / average)
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn silence_has_no_features() {
        let mut features = SpectralFeatures::new();
        let frame = features.analyse(0.0, &[0.0; 1024], 48_000.0).unwrap();

        assert!(frame.rms.abs() <= f32::EPSILON);
        assert_eq!(frame.centroid, 0.0);
        assert_eq!(frame.onset, 0.0);
    }

    #[test]
    fn centroid_tracks_the_sine_frequency() {
        let mut features = SpectralFeatures::new();
        let low = features
            .analyse(0.0, &sine(1_000.0, 48_000.0, 1024), 48_000.0)
            .unwrap();
        let high = features
            .analyse(0.0, &sine(12_000.0, 48_000.0, 1024), 48_000.0)
            .unwrap();

        assert!((low.rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.02);
        assert!(low.centroid < high.centroid);
        assert!((high.centroid - 0.5).abs() < 0.05);
    }

    #[test]
    fn rejects_tiny_blocks() {
        let mut features = SpectralFeatures::new();
        assert!(features.analyse(0.0, &[1.0], 100.0).is_err());
    }

    #[test]
    fn transform_writes_one_feature_sample() {
        let input_shape = StreamShape::new(2, SampleType::Float, 100.0);
        let output_shape = SpectralFeatures::output_shape(&input_shape, 10);
        assert_eq!(output_shape.sample_rate, 10.0);

        let mut features = SpectralFeatures::new();
        features
            .transform_enter(&input_shape, &output_shape, &[])
            .unwrap();

        let input = Stream::from_f32(2, 100.0, &[1.0; 24]).unwrap();
        let mut output = Stream::new(output_shape);
        features
            .transform(&FrameInfo::new(0.0, 10, 2), &input, &mut output, &[])
            .unwrap();

        assert_eq!(output.num(), 1);
        assert!((output.value(0, 0) - 1.0).abs() < 1e-6);
        assert_eq!(output.value(0, 2), 1.0);
    }

    #[test]
    fn enter_rejects_wrong_output_dimension() {
        let mut features = SpectralFeatures::new();
        let input = StreamShape::new(1, SampleType::Float, 100.0);
        let output = StreamShape::new(1, SampleType::Float, 10.0);
        assert!(matches!(
            features.transform_enter(&input, &output, &[]),
            Err(SignalPipeError::Config(_))
        ));
    }

    #[test]
    fn summary_counts_onsets_and_tempo() {
        let quiet = vec![0.0; 25];
        let loud = vec![1.0; 25];
        let mut samples = Vec::new();
        for _ in 0..4 {
            samples.extend_from_slice(&quiet);
            samples.extend_from_slice(&loud);
        }

        let summary = SpectralFeatures::summarize(&samples, 100.0, 25).unwrap();
        assert_eq!(summary.frames, 8);
        assert_eq!(summary.onsets, 4);
        assert!((summary.duration_seconds - 2.0).abs() < 1e-9);
        assert!((summary.peak_rms - 1.0).abs() < 1e-6);
        let tempo = summary.tempo_bpm.unwrap();
        assert!((tempo - 120.0).abs() < 10.0);
    }
}
