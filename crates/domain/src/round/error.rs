use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("bad format of round number {value:?}: {reason}")]
    BadFormat { value: String, reason: String },
}
