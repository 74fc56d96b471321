//! Exit codes for drd.
//!
//! Configuration failures exit with the validation error's own code
//! (60-66); see `dr_config::ValidationError::code`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Ran to completion or stopped on request.
    Clean = 0,

    /// Invalid arguments.
    ArgsError = 10,

    /// A daemon thread panicked.
    InternalError = 20,

    /// The output directory or another required path is unusable.
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}
