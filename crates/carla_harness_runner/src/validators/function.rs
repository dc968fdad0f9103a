//! Implements [super::IntoValidator] for closures.
enum FunctionValidator<F> {
    KeepGoing(F),
    Failed(String),
}

impl<F> super::Validator for FunctionValidator<F>
where
    F: FnMut(u64, &[f32]) -> Result<(), String> + Send + 'static,
{
    fn validate_frame(&mut self, index: u64, frame: &[f32]) {
        if let FunctionValidator::KeepGoing(ref mut cb) = self {
            if let Err(msg) = cb(index, frame) {
                *self = FunctionValidator::Failed(msg);
            }
        }
    }

    fn finalize(&mut self) -> Result<(), super::ValidatorFailure> {
        match self {
            FunctionValidator::KeepGoing(_) => Ok(()),
            FunctionValidator::Failed(msg) => Err(super::ValidatorFailure::SimpleMessage(msg.clone())),
        }
    }
}

impl<F> super::IntoValidator for F
where
    F: FnMut(u64, &[f32]) -> Result<(), String> + Send + 'static,
{
    fn build_validator(self: Box<Self>) -> Box<dyn super::Validator> {
        Box::new(FunctionValidator::KeepGoing(*self))
    }

    fn get_tag(&self) -> &str {
        "Closure"
    }
}
