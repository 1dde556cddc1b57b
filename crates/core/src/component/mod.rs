//! Interfaces through which the pipeline drives processing components.

use crate::{Result, Stream, StreamShape};

/// Timing of the frame handed to a component in one pipeline cycle.
///
/// The input stream holds `frame_num` new samples followed by `delta_num`
/// lookahead samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameInfo {
    /// Stream time of the first sample in seconds.
    pub time: f64,
    pub frame_num: usize,
    pub delta_num: usize,
}

impl FrameInfo {
    pub fn new(time: f64, frame_num: usize, delta_num: usize) -> Self {
        Self {
            time,
            frame_num,
            delta_num,
        }
    }
}

/// Synchronous stream transformer: maps an input frame (plus optional extra
/// input streams) to an output frame.
pub trait Transformer: Send {
    /// Name used in logs and thread names.
    fn name(&self) -> &str;

    fn transform_enter(
        &mut self,
        _input: &StreamShape,
        _output: &StreamShape,
        _extra: &[StreamShape],
    ) -> Result<()> {
        Ok(())
    }

    /// Computes one output frame. `output` already holds the number of
    /// samples the caller expects.
    fn transform(
        &mut self,
        info: &FrameInfo,
        input: &Stream,
        output: &mut Stream,
        extra: &[Stream],
    ) -> Result<()>;

    fn transform_flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Terminal component that consumes frames without producing a stream.
pub trait Consumer {
    fn consume_enter(&mut self, inputs: &[StreamShape]) -> Result<()>;

    fn consume(&mut self, info: &FrameInfo, inputs: &[Stream]) -> Result<()>;

    fn consume_flush(&mut self) -> Result<()> {
        Ok(())
    }
}
