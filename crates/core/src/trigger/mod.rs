//! Threshold trigger that turns a sample stream into timed events.
//!
//! Each sample is tested against a threshold in every dimension. A run of
//! matching samples has to last `hang_in + 1` samples before the trigger
//! switches on, and a run of non-matching samples has to last `hang_out + 1`
//! samples before it switches off again and the event is reported. Onset and
//! offset use separate thresholds, so noise around a single level cannot make
//! the trigger flicker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    component::{Consumer, FrameInfo},
    event::{Event, EventListener, EventPayload, EventState, UniqueIds},
    Result, SignalPipeError, Stream, StreamShape,
};

/// Comparison between a sample value `v` and the thresholds `t` (and `t_end`
/// for the range variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// `v > t`
    #[default]
    Greater,
    /// `v >= t`
    GreaterEqual,
    /// `v < t`
    Lesser,
    /// `v <= t`
    LesserEqual,
    Equal,
    NotEqual,
    /// `t < v < t_end`
    InRange,
    /// `t <= v <= t_end`
    InRangeEqual,
    /// `v < t || v > t_end`
    NotInRange,
    /// `v <= t || v >= t_end`
    NotInRangeEqual,
}

impl TriggerKind {
    pub fn check(self, value: f64, threshold: f64, threshold_end: f64) -> bool {
        match self {
            TriggerKind::Greater => value > threshold,
            TriggerKind::GreaterEqual => value >= threshold,
            TriggerKind::Lesser => value < threshold,
            TriggerKind::LesserEqual => value <= threshold,
            TriggerKind::Equal => value == threshold,
            TriggerKind::NotEqual => value != threshold,
            TriggerKind::InRange => value > threshold && value < threshold_end,
            TriggerKind::InRangeEqual => value >= threshold && value <= threshold_end,
            TriggerKind::NotInRange => value < threshold || value > threshold_end,
            TriggerKind::NotInRangeEqual => value <= threshold || value >= threshold_end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    #[default]
    Empty,
    /// `event_string` is sent as is.
    String,
    /// Per-dimension means keyed by the `;`-separated names in `event_string`.
    /// Means cover every sample that met the threshold since the onset,
    /// before and after confirmation; hangover samples are left out.
    Map,
    /// Per-dimension means over the same samples as [`PayloadKind::Map`].
    Tuple,
}

/// Settings of a [`TriggerEventSender`]. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerOptions {
    pub trigger: TriggerKind,
    pub threshold_in: f64,
    /// Offset threshold; the onset threshold is used when unset.
    pub threshold_out: Option<f64>,
    pub threshold_in_end: f64,
    pub threshold_out_end: Option<f64>,
    /// Require every dimension to match instead of any.
    pub hard_threshold: bool,
    /// Hangover in samples; overrides the duration when > 0.
    pub hang_in_samples: usize,
    pub hang_out_samples: usize,
    pub hang_in_duration: f64,
    pub hang_out_duration: f64,
    /// Shorter events are dropped.
    pub min_duration: f64,
    /// When > 0, an open event is reported as CONTINUED every `inc_duration`.
    pub inc_duration: f64,
    /// When > 0, longer events are cropped to their last `max_duration`.
    pub max_duration: f64,
    /// Subtracted from the reported start time.
    pub offset_in: f64,
    /// Added to the reported duration.
    pub offset_out: f64,
    /// Report a zero-length CONTINUED event as soon as an onset is confirmed.
    pub eager: bool,
    /// Drop completed events longer than `max_duration` instead of cropping.
    pub skip_max_duration: bool,
    pub payload: PayloadKind,
    pub event_string: String,
    pub sender: String,
    pub event_name: String,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            trigger: TriggerKind::Greater,
            threshold_in: 0.0,
            threshold_out: None,
            threshold_in_end: 1.0,
            threshold_out_end: None,
            hard_threshold: false,
            hang_in_samples: 0,
            hang_out_samples: 0,
            hang_in_duration: 0.0,
            hang_out_duration: 0.0,
            min_duration: 0.0,
            inc_duration: 0.0,
            max_duration: 0.0,
            offset_in: 0.0,
            offset_out: 0.0,
            eager: false,
            skip_max_duration: false,
            payload: PayloadKind::Empty,
            event_string: String::new(),
            sender: "trigger".to_string(),
            event_name: "event".to_string(),
        }
    }
}

impl TriggerOptions {
    fn samples(samples: usize, duration: f64, sample_rate: f64) -> usize {
        if samples > 0 {
            samples
        } else {
            (duration * sample_rate).round().max(0.0) as usize
        }
    }

    pub fn hang_in(&self, sample_rate: f64) -> usize {
        Self::samples(self.hang_in_samples, self.hang_in_duration, sample_rate)
    }

    pub fn hang_out(&self, sample_rate: f64) -> usize {
        Self::samples(self.hang_out_samples, self.hang_out_duration, sample_rate)
    }
}

/// Onset and offset thresholds in the stream's own sample type.
#[derive(Debug, Clone, Copy, Default)]
struct Thresholds {
    on: f64,
    on_end: f64,
    off: f64,
    off_end: f64,
}

impl Thresholds {
    fn new(options: &TriggerOptions, shape: &StreamShape) -> Self {
        let quantize = |value: f64| shape.sample_type.quantize(value);
        Self {
            on: quantize(options.threshold_in),
            on_end: quantize(options.threshold_in_end),
            off: quantize(options.threshold_out.unwrap_or(options.threshold_in)),
            off_end: quantize(
                options
                    .threshold_out_end
                    .unwrap_or(options.threshold_in_end),
            ),
        }
    }
}

/// Per-run state, rebuilt on every `consume_enter`.
#[derive(Debug, Default)]
struct Detector {
    shape: Option<StreamShape>,
    thresholds: Thresholds,
    validated: bool,
    on: bool,
    hang_in: usize,
    hang_out: usize,
    counter_in: usize,
    counter_out: usize,
    samples_inc: usize,
    counter_inc: usize,
    start: f64,
    stop: f64,
    sums: Vec<f64>,
    summed: usize,
}

/// Consumer that reports threshold crossings of its first input stream to an
/// [`EventListener`].
pub struct TriggerEventSender {
    options: TriggerOptions,
    listener: Option<Box<dyn EventListener>>,
    ids: Arc<UniqueIds>,
    keys: Vec<String>,
    event: Event,
    detector: Detector,
}

impl TriggerEventSender {
    pub fn new(options: TriggerOptions) -> Self {
        let event = Event::new(options.sender.clone(), options.event_name.clone());
        Self {
            options,
            listener: None,
            ids: Arc::new(UniqueIds::new()),
            keys: Vec::new(),
            event,
            detector: Detector::default(),
        }
    }

    /// Shares a glue id source with other senders.
    pub fn with_ids(mut self, ids: Arc<UniqueIds>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_listener(mut self, listener: Box<dyn EventListener>) -> Self {
        self.set_event_listener(listener);
        self
    }

    pub fn options(&self) -> &TriggerOptions {
        &self.options
    }

    /// Whether an onset has been confirmed and its offset not yet.
    pub fn is_on(&self) -> bool {
        self.detector.on
    }

    pub fn set_event_listener(&mut self, listener: Box<dyn EventListener>) {
        self.event = Event::new(self.options.sender.clone(), self.options.event_name.clone());
        self.keys.clear();
        match self.options.payload {
            PayloadKind::String => {
                self.event.payload = EventPayload::String(self.options.event_string.clone());
            }
            PayloadKind::Map => {
                self.keys = self
                    .options
                    .event_string
                    .split(';')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            PayloadKind::Empty | PayloadKind::Tuple => {}
        }
        self.listener = Some(listener);
    }

    fn validate(&mut self, info: &FrameInfo) -> Result<()> {
        let detector = &mut self.detector;
        if detector.hang_in > info.delta_num || detector.hang_out > info.delta_num {
            tracing::warn!(
                hang_in = detector.hang_in,
                hang_out = detector.hang_out,
                delta = info.delta_num,
                "hangover exceeds the available lookahead"
            );
            return Err(SignalPipeError::config(format!(
                "hangover in/out ({}/{}) exceeds the lookahead of {} samples",
                detector.hang_in, detector.hang_out, info.delta_num
            )));
        }
        detector.validated = true;
        Ok(())
    }

    fn accumulate(&mut self, stream: &Stream, index: usize) {
        let detector = &mut self.detector;
        for (dim, sum) in detector.sums.iter_mut().enumerate() {
            *sum += stream.value(index, dim);
        }
        detector.summed += 1;
    }

    fn means(&self) -> Vec<f32> {
        let detector = &self.detector;
        detector
            .sums
            .iter()
            .map(|sum| {
                if detector.summed == 0 {
                    0.0
                } else {
                    (sum / detector.summed as f64) as f32
                }
            })
            .collect()
    }

    fn send(&mut self) {
        match self.options.payload {
            PayloadKind::Map => {
                let means = self.means();
                let entries = means
                    .into_iter()
                    .enumerate()
                    .map(|(dim, mean)| {
                        let key = if self.keys.is_empty() {
                            format!("dim{dim}")
                        } else {
                            self.keys[dim % self.keys.len()].clone()
                        };
                        (key, mean)
                    })
                    .collect();
                self.event.payload = EventPayload::Map(entries);
            }
            PayloadKind::Tuple => self.event.payload = EventPayload::Tuple(self.means()),
            PayloadKind::Empty | PayloadKind::String => {}
        }

        if let Some(listener) = self.listener.as_mut() {
            listener.update(&self.event);
        }
    }

    fn start_event(&mut self) {
        self.event.time = (1000.0 * self.detector.start).round().max(0.0) as u64;
        self.event.dur = 0;
        self.event.state = EventState::Continued;
        self.event.glue_id = Some(self.ids.next_id());
        self.send();
    }

    /// Reports the open event as ending at `now`, cropped to `max_duration`.
    fn report(&mut self, now: f64, state: EventState) -> bool {
        let mut start = self.detector.start;
        let mut dur = now - start;

        let max = self.options.max_duration;
        if max > 0.0 && dur > max {
            if state == EventState::Completed && self.options.skip_max_duration {
                tracing::debug!(time = start, dur, "skip event because duration exceeds maximum");
                self.event.glue_id = None;
                return false;
            }
            dur = max;
            start = now - max;
        }

        self.update_h(start, dur, state)
    }

    /// Emits the event unless it is too short. Times are in seconds.
    fn update_h(&mut self, time: f64, dur: f64, state: EventState) -> bool {
        if dur < self.options.min_duration || dur <= 0.0 {
            tracing::debug!(time, dur, "skip event because duration too short");
            if state == EventState::Completed {
                self.event.glue_id = None;
            }
            return false;
        }

        self.event.time = (1000.0 * (time - self.options.offset_in)).round().max(0.0) as u64;
        self.event.dur = (1000.0 * (dur + self.options.offset_out)).round().max(0.0) as u64;
        self.event.state = state;
        if state == EventState::Continued && self.event.glue_id.is_none() {
            self.event.glue_id = Some(self.ids.next_id());
        }

        self.send();

        if state == EventState::Completed {
            self.event.glue_id = None;
        }
        true
    }
}

impl Consumer for TriggerEventSender {
    fn consume_enter(&mut self, inputs: &[StreamShape]) -> Result<()> {
        let shape = *inputs
            .first()
            .ok_or(SignalPipeError::InvalidInput("trigger needs an input stream"))?;
        if shape.dim == 0 {
            return Err(SignalPipeError::InvalidInput("trigger input has no dimensions"));
        }
        if shape.sample_rate <= 0.0 {
            return Err(SignalPipeError::InvalidInput("trigger input has no sample rate"));
        }

        let hang_in = self.options.hang_in(shape.sample_rate);
        let hang_out = self.options.hang_out(shape.sample_rate);
        let samples_inc = if self.options.inc_duration > 0.0 {
            (self.options.inc_duration * shape.sample_rate).round() as usize
        } else {
            0
        };

        self.detector = Detector {
            shape: Some(shape),
            thresholds: Thresholds::new(&self.options, &shape),
            validated: false,
            on: false,
            hang_in,
            hang_out,
            counter_in: hang_in,
            counter_out: hang_out,
            samples_inc,
            counter_inc: 0,
            start: 0.0,
            stop: 0.0,
            sums: vec![0.0; shape.dim],
            summed: 0,
        };
        self.event.glue_id = None;

        tracing::debug!(
            sender = %self.event.address(),
            hang_in,
            hang_out,
            samples_inc,
            "trigger entered"
        );
        Ok(())
    }

    fn consume(&mut self, info: &FrameInfo, inputs: &[Stream]) -> Result<()> {
        let stream = inputs
            .first()
            .ok_or(SignalPipeError::InvalidInput("trigger needs an input stream"))?;
        let Some(shape) = self.detector.shape else {
            return Err(SignalPipeError::NotEntered(self.event.address()));
        };
        if stream.dim() != shape.dim {
            return Err(SignalPipeError::InvalidInput(
                "trigger input dimension changed since enter",
            ));
        }
        if !self.detector.validated {
            self.validate(info)?;
        }

        let count = if info.frame_num == 0 {
            stream.num()
        } else {
            info.frame_num.min(stream.num())
        };

        for index in 0..count {
            let now = info.time + index as f64 / shape.sample_rate;

            let found = {
                let detector = &self.detector;
                let (threshold, threshold_end) = if detector.on {
                    (detector.thresholds.off, detector.thresholds.off_end)
                } else {
                    (detector.thresholds.on, detector.thresholds.on_end)
                };
                let mut hits = (0..shape.dim).map(|dim| {
                    self.options
                        .trigger
                        .check(stream.value(index, dim), threshold, threshold_end)
                });
                if self.options.hard_threshold {
                    hits.all(|hit| hit)
                } else {
                    hits.any(|hit| hit)
                }
            };

            if !self.detector.on {
                if !found {
                    self.detector.counter_in = self.detector.hang_in;
                    continue;
                }

                if self.detector.counter_in == self.detector.hang_in {
                    self.detector.start = now;
                    self.detector.sums.fill(0.0);
                    self.detector.summed = 0;
                }
                self.accumulate(stream, index);

                if self.detector.counter_in == 0 {
                    let detector = &mut self.detector;
                    detector.on = true;
                    detector.counter_out = detector.hang_out;
                    detector.counter_inc = detector
                        .samples_inc
                        .saturating_sub(detector.hang_in)
                        .max(1);
                    if self.options.eager {
                        self.start_event();
                    }
                    tracing::debug!(time = self.detector.start, "event started");
                } else {
                    self.detector.counter_in -= 1;
                }
                continue;
            }

            if self.detector.samples_inc > 0 {
                self.detector.counter_inc -= 1;
                if self.detector.counter_inc == 0 {
                    self.report(now, EventState::Continued);
                    self.detector.counter_inc = self.detector.samples_inc;
                }
            }

            if found {
                self.accumulate(stream, index);
                self.detector.counter_out = self.detector.hang_out;
                continue;
            }

            if self.detector.counter_out == self.detector.hang_out {
                self.detector.stop = now;
            }
            if self.detector.counter_out == 0 {
                let stop = self.detector.stop;
                self.report(stop, EventState::Completed);
                self.detector.on = false;
                self.detector.counter_in = self.detector.hang_in;
                tracing::debug!(time = stop, "event stopped");
            } else {
                self.detector.counter_out -= 1;
            }
        }

        Ok(())
    }

    fn consume_flush(&mut self) -> Result<()> {
        if self.detector.on {
            tracing::debug!(
                sender = %self.event.address(),
                start = self.detector.start,
                "open event discarded on flush"
            );
        }
        self.detector = Detector::default();
        self.event.glue_id = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCollector;

    const SR: f64 = 10.0;

    fn sender(options: TriggerOptions, dim: usize) -> (TriggerEventSender, EventCollector) {
        let events = EventCollector::new();
        let mut sender =
            TriggerEventSender::new(options).with_listener(Box::new(events.clone()));
        sender
            .consume_enter(&[StreamShape::new(dim, crate::SampleType::Float, SR)])
            .unwrap();
        (sender, events)
    }

    /// Feeds `values` as one frame, padded with `delta` lookahead samples.
    fn feed(
        sender: &mut TriggerEventSender,
        values: &[f32],
        dim: usize,
        delta: usize,
    ) -> Result<()> {
        let mut padded = values.to_vec();
        padded.extend(std::iter::repeat(0.0).take(delta * dim));
        let stream = Stream::from_f32(dim, SR, &padded)?;
        let info = FrameInfo::new(0.0, values.len() / dim, delta);
        sender.consume(&info, &[stream])
    }

    fn options() -> TriggerOptions {
        TriggerOptions {
            threshold_in: 0.5,
            ..TriggerOptions::default()
        }
    }

    #[test]
    fn short_candidate_run_is_abandoned() {
        let (mut sender, events) = sender(
            TriggerOptions {
                hang_in_samples: 5,
                ..options()
            },
            1,
        );

        feed(&mut sender, &[1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1, 5).unwrap();
        assert!(events.is_empty());
        assert!(!sender.is_on());
    }

    #[test]
    fn events_shorter_than_min_duration_are_dropped() {
        let opts = TriggerOptions {
            min_duration: 0.5,
            ..options()
        };

        let (mut short, events) = sender(opts.clone(), 1);
        feed(&mut short, &[0.0, 1.0, 1.0, 1.0, 0.0, 0.0], 1, 0).unwrap();
        assert!(events.is_empty());

        let (mut long, events) = sender(opts, 1);
        feed(
            &mut long,
            &[0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0],
            1,
            0,
        )
        .unwrap();
        let events = events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, 100);
        assert_eq!(events[0].dur, 700);
        assert_eq!(events[0].state, EventState::Completed);
        assert_eq!(events[0].glue_id, None);
    }

    #[test]
    fn incremental_updates_share_one_glue_id() {
        let (mut sender, events) = sender(
            TriggerOptions {
                inc_duration: 0.2,
                ..options()
            },
            1,
        );

        let mut values = vec![0.0];
        values.extend([1.0; 6]);
        values.extend([0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        feed(&mut sender, &values, 1, 0).unwrap();

        let events = events.events();
        let states: Vec<EventState> = events.iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![
                EventState::Continued,
                EventState::Continued,
                EventState::Continued,
                EventState::Completed,
                EventState::Continued,
                EventState::Completed,
            ]
        );

        let first = events[0].glue_id.unwrap();
        assert!(events[..4].iter().all(|e| e.glue_id == Some(first)));
        assert_eq!(events[0].dur, 200);
        assert_eq!(events[1].dur, 400);
        assert_eq!(events[3].time, 100);
        assert_eq!(events[3].dur, 600);

        let second = events[4].glue_id.unwrap();
        assert_ne!(first, second);
        assert_eq!(events[5].glue_id, Some(second));
        assert_eq!(events[5].time, 900);
    }

    #[test]
    fn eager_mode_reports_the_onset_immediately() {
        let (mut sender, events) = sender(
            TriggerOptions {
                hang_in_samples: 2,
                eager: true,
                ..options()
            },
            1,
        );

        feed(
            &mut sender,
            &[0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0],
            1,
            2,
        )
        .unwrap();

        let events = events.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].state, EventState::Continued);
        assert_eq!((events[0].time, events[0].dur), (100, 0));
        assert!(events[0].glue_id.is_some());
        assert_eq!(events[1].state, EventState::Completed);
        assert_eq!((events[1].time, events[1].dur), (100, 500));
        assert_eq!(events[1].glue_id, events[0].glue_id);
    }

    #[test]
    fn hard_threshold_requires_every_dimension() {
        let samples = [
            1.0, 0.0, //
            1.0, 0.0, //
            0.0, 0.0, //
            1.0, 1.0, //
            1.0, 1.0, //
            0.0, 0.0,
        ];

        let (mut soft, soft_events) = sender(options(), 2);
        feed(&mut soft, &samples, 2, 0).unwrap();
        let soft_events = soft_events.events();
        assert_eq!(soft_events.len(), 2);
        assert_eq!((soft_events[0].time, soft_events[0].dur), (0, 200));

        let (mut hard, hard_events) = sender(
            TriggerOptions {
                hard_threshold: true,
                ..options()
            },
            2,
        );
        feed(&mut hard, &samples, 2, 0).unwrap();
        let hard_events = hard_events.events();
        assert_eq!(hard_events.len(), 1);
        assert_eq!((hard_events[0].time, hard_events[0].dur), (300, 200));
    }

    #[test]
    fn hangover_beyond_lookahead_is_a_config_error() {
        let (mut sender, events) = sender(
            TriggerOptions {
                hang_in_samples: 3,
                ..options()
            },
            1,
        );

        let err = feed(&mut sender, &[1.0, 1.0], 1, 1).unwrap_err();
        assert!(matches!(err, SignalPipeError::Config(_)));
        assert!(events.is_empty());

        feed(&mut sender, &[1.0, 1.0], 1, 3).unwrap();
    }

    #[test]
    fn offsets_shift_and_clamp_the_report() {
        let (mut sender, events) = sender(
            TriggerOptions {
                offset_in: 0.5,
                offset_out: 0.1,
                ..options()
            },
            1,
        );

        feed(&mut sender, &[0.0, 1.0, 1.0, 1.0, 0.0], 1, 0).unwrap();
        let events = events.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].time, events[0].dur), (0, 400));
    }

    #[test]
    fn long_events_are_cropped_or_skipped() {
        let values = [0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0];
        let opts = TriggerOptions {
            max_duration: 0.3,
            ..options()
        };

        let (mut cropped, events) = sender(opts.clone(), 1);
        feed(&mut cropped, &values, 1, 0).unwrap();
        let events = events.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].time, events[0].dur), (400, 300));

        let (mut skipped, events) = sender(
            TriggerOptions {
                skip_max_duration: true,
                ..opts
            },
            1,
        );
        feed(&mut skipped, &values, 1, 0).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn offset_threshold_gives_hysteresis() {
        let values = [0.0, 0.95, 0.7, 0.6, 0.3, 0.0];

        let (mut single, events) = sender(
            TriggerOptions {
                threshold_in: 0.9,
                ..options()
            },
            1,
        );
        feed(&mut single, &values, 1, 0).unwrap();
        assert_eq!(events.events()[0].dur, 100);

        let (mut split, events) = sender(
            TriggerOptions {
                threshold_in: 0.9,
                threshold_out: Some(0.5),
                ..options()
            },
            1,
        );
        feed(&mut split, &values, 1, 0).unwrap();
        let events = events.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].time, events[0].dur), (100, 300));
    }

    #[test]
    fn payload_holds_means_of_active_samples() {
        let (mut tuple, events) = sender(
            TriggerOptions {
                payload: PayloadKind::Tuple,
                ..options()
            },
            1,
        );
        feed(&mut tuple, &[0.0, 2.0, 4.0, 0.0], 1, 0).unwrap();
        assert_eq!(events.events()[0].payload, EventPayload::Tuple(vec![3.0]));

        let (mut map, events) = sender(
            TriggerOptions {
                payload: PayloadKind::Map,
                event_string: "left;right".to_string(),
                ..options()
            },
            2,
        );
        feed(&mut map, &[0.0, 0.0, 1.0, 3.0, 3.0, 5.0, 0.0, 0.0], 2, 0).unwrap();
        assert_eq!(
            events.events()[0].payload,
            EventPayload::Map(vec![("left".to_string(), 2.0), ("right".to_string(), 4.0)])
        );
    }

    #[test]
    fn payload_means_leave_out_hangover_samples() {
        let (mut sender, events) = sender(
            TriggerOptions {
                payload: PayloadKind::Tuple,
                hang_out_samples: 2,
                ..options()
            },
            1,
        );
        feed(&mut sender, &[0.0, 2.0, 4.0, 0.1, 6.0, 0.0, 0.0, 0.0], 1, 2).unwrap();

        let events = events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].dur, 400);
        assert_eq!(events[0].payload, EventPayload::Tuple(vec![4.0]));
    }

    #[test]
    fn range_kinds_compare_against_both_ends() {
        assert!(TriggerKind::InRange.check(0.5, 0.0, 1.0));
        assert!(!TriggerKind::InRange.check(1.0, 0.0, 1.0));
        assert!(TriggerKind::InRangeEqual.check(1.0, 0.0, 1.0));
        assert!(TriggerKind::NotInRange.check(1.5, 0.0, 1.0));
        assert!(TriggerKind::NotInRangeEqual.check(0.0, 0.0, 1.0));
        assert!(TriggerKind::LesserEqual.check(1.0, 1.0, 0.0));
    }

    #[test]
    fn string_payload_and_address_come_from_options() {
        let (mut sender, events) = sender(
            TriggerOptions {
                payload: PayloadKind::String,
                event_string: "speech".to_string(),
                sender: "audio".to_string(),
                event_name: "vad".to_string(),
                ..options()
            },
            1,
        );
        feed(&mut sender, &[1.0, 1.0, 0.0], 1, 0).unwrap();

        let events = events.events();
        assert_eq!(events[0].address(), "vad@audio");
        assert_eq!(events[0].payload, EventPayload::String("speech".to_string()));
    }
}
