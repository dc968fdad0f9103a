use super::*;

/// A [IntoValidator] which checks that every sample is finite and within `-1.0..=1.0`.
pub struct RangeValidator;

#[derive(Debug, derive_more::IsVariant)]
enum State {
    Good,

    Failed { index: u64, value: f32, channel: usize },
}

struct RangeImpl {
    state: State,
}

impl Validator for RangeImpl {
    fn validate_frame(&mut self, index: u64, frame: &[f32]) {
        if !self.state.is_good() {
            return;
        }

        // NaN fails the containment check as well.
        if let Some((channel, value)) = frame
            .iter()
            .copied()
            .enumerate()
            .find(|(_, s)| !(-1.0..=1.0).contains(s))
        {
            self.state = State::Failed {
                index,
                value,
                channel,
            };
        }
    }

    fn finalize(&mut self) -> Result<(), ValidatorFailure> {
        if let State::Failed {
            index,
            value,
            channel,
        } = &self.state
        {
            return Err(ValidatorFailure::SimpleMessage(format!(
                "out of range at frame {index} with value {value} on channel {channel}"
            )));
        }

        Ok(())
    }
}

impl IntoValidator for RangeValidator {
    fn build_validator(self: Box<Self>) -> Box<dyn Validator> {
        Box::new(RangeImpl { state: State::Good })
    }

    fn get_tag(&self) -> &str {
        "RangeValidator"
    }
}
