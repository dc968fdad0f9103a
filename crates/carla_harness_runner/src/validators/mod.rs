mod function;
mod non_silent;
mod range;

use serde::{Deserialize, Serialize};

use carla_harness::CapturedAudio;

pub use non_silent::*;
pub use range::*;

/// Reasons a validator may fail.
#[derive(Clone, Debug, derive_more::Display, Serialize, Deserialize)]
pub enum ValidatorFailure {
    #[display(fmt = "{}", _0)]
    SimpleMessage(String),
}

/// Something which checks a capture frame by frame.
///
/// Validators should not stop early or panic, so that everything wrong with a capture is reported at once.
pub trait Validator: Send + 'static {
    /// Look at one interleaved frame.  `index` counts from the start of the capture.
    fn validate_frame(&mut self, index: u64, frame: &[f32]);

    /// If this validator has failed, return `Err` explaining why.
    fn finalize(&mut self) -> Result<(), ValidatorFailure>;

    /// Run over a whole capture.
    fn validate_capture(&mut self, audio: &CapturedAudio) {
        let channels = audio.channels.max(1);
        for (index, frame) in audio.samples.chunks_exact(channels).enumerate() {
            self.validate_frame(index as u64, frame);
        }
    }
}

/// Something which may build a validator.  Scenario configuration holds these, and a fresh validator is built from
/// each for every run.
///
/// Also implemented for `FnMut(u64, &[f32]) -> Result<(), String>`, which fails the first time the closure does.
pub trait IntoValidator: 'static {
    fn build_validator(self: Box<Self>) -> Box<dyn Validator>;

    /// The kind of validator, e.g. "RangeValidator".  Used when reporting.
    fn get_tag(&self) -> &str;
}

/// Run every validator in `validators` over `audio`, returning the failures by index.
pub fn validate(
    validators: Vec<Box<dyn IntoValidator>>,
    audio: &CapturedAudio,
) -> Vec<(usize, ValidatorFailure)> {
    validators
        .into_iter()
        .enumerate()
        .filter_map(|(index, v)| {
            let mut v = v.build_validator();
            v.validate_capture(audio);
            v.finalize().err().map(|e| (index, e))
        })
        .collect()
}
