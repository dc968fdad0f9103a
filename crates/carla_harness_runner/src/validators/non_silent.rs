use super::*;

/// A [IntoValidator] which checks that some sample exceeds a threshold, optionally before a given frame.
pub struct NonSilentValidator {
    threshold: f32,
    before_frame: Option<u64>,
}

impl NonSilentValidator {
    /// Anywhere in the capture.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            before_frame: None,
        }
    }

    /// Within the first `frames` frames.
    pub fn within(threshold: f32, frames: u64) -> Self {
        Self {
            threshold,
            before_frame: Some(frames),
        }
    }
}

struct NonSilentImpl {
    threshold: f32,
    before_frame: Option<u64>,
    first_loud: Option<u64>,
}

impl Validator for NonSilentImpl {
    fn validate_frame(&mut self, index: u64, frame: &[f32]) {
        if self.first_loud.is_none() && frame.iter().any(|s| s.abs() > self.threshold) {
            self.first_loud = Some(index);
        }
    }

    fn finalize(&mut self) -> Result<(), ValidatorFailure> {
        match (self.first_loud, self.before_frame) {
            (None, _) => Err(ValidatorFailure::SimpleMessage(format!(
                "no sample above {}",
                self.threshold
            ))),
            (Some(first), Some(limit)) if first >= limit => {
                Err(ValidatorFailure::SimpleMessage(format!(
                    "first sample above {} is at frame {first}, expected one before frame {limit}",
                    self.threshold
                )))
            }
            _ => Ok(()),
        }
    }
}

impl IntoValidator for NonSilentValidator {
    fn build_validator(self: Box<Self>) -> Box<dyn Validator> {
        Box::new(NonSilentImpl {
            threshold: self.threshold,
            before_frame: self.before_frame,
            first_loud: None,
        })
    }

    fn get_tag(&self) -> &str {
        "NonSilentValidator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(validator: NonSilentValidator, samples: Vec<f32>) -> Result<(), ValidatorFailure> {
        let audio = CapturedAudio {
            samples,
            channels: 1,
            sample_rate: 48000,
            first_cycle: 0,
        };
        let mut v = Box::new(validator).build_validator();
        v.validate_capture(&audio);
        v.finalize()
    }

    #[test]
    fn silence_fails() {
        assert!(run(NonSilentValidator::new(0.01), vec![0.0; 16]).is_err());
    }

    #[test]
    fn late_onsets_fail_a_window() {
        let mut samples = vec![0.0; 16];
        samples[10] = 0.5;
        assert!(run(NonSilentValidator::new(0.01), samples.clone()).is_ok());
        assert!(run(NonSilentValidator::within(0.01, 11), samples.clone()).is_ok());
        assert!(run(NonSilentValidator::within(0.01, 10), samples).is_err());
    }
}
