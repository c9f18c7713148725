use std::fmt::Display;

pub type VatResult<T> = Result<T, VatError>;

/// Failures surfaced to the user as status messages. None of them are fatal.
#[derive(thiserror::Error, Debug)]
pub enum VatError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Wraps a lower-level failure with the resource it was loading.
    pub fn load_from(what: impl Display, err: impl Display) -> Self {
        Self::Load(format!("{what}: {err}"))
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            VatError::Validation(_) => "Validation",
            VatError::Load(_) => "Load",
            VatError::Parse(_) => "Parse",
            VatError::Other(_) => "Error",
        }
    }

    /// Single-line message suitable for a status bar.
    pub fn status_message(&self) -> String {
        match self {
            VatError::Validation(msg) | VatError::Load(msg) | VatError::Parse(msg) => {
                format!("{} failed: {msg}", self.kind_label())
            }
            VatError::Other(err) => format!("Error: {err:#}"),
        }
    }
}
