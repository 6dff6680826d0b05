//! Error types for effect merging, pass scheduling and backend calls.
//!
//! Configuration errors raised while merging effects are fatal for that
//! compilation attempt and always name the offending effect. Backend errors
//! abort the current frame only.

use std::fmt;

/// Why an effect list could not be merged into a single program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeErrorKind {
    /// The fragment body declares neither `mainImage` nor `mainUv`.
    MissingEntryPoint,
    /// The fragment body declares both `mainImage` and `mainUv`.
    AmbiguousEntryPoint,
    /// A UV-transforming effect shares a pass with a convolution effect.
    UvTransformWithConvolution,
    /// More than one active convolution effect in the same pass.
    MultipleConvolutions,
}

impl fmt::Display for MergeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeErrorKind::MissingEntryPoint => {
                write!(f, "fragment shader declares neither mainImage nor mainUv")
            }
            MergeErrorKind::AmbiguousEntryPoint => {
                write!(f, "fragment shader declares both mainImage and mainUv")
            }
            MergeErrorKind::UvTransformWithConvolution => {
                write!(f, "effects that transform UVs are incompatible with convolution effects")
            }
            MergeErrorKind::MultipleConvolutions => {
                write!(f, "convolution effects cannot be merged")
            }
        }
    }
}

/// Fatal configuration error tied to one effect of the merged list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeError {
    /// Name of the offending effect.
    pub effect: String,
    /// Position of the offending effect in the list handed to the compiler.
    pub index: usize,
    pub kind: MergeErrorKind,
}

impl MergeError {
    pub fn new(effect: impl Into<String>, index: usize, kind: MergeErrorKind) -> Self {
        Self {
            effect: effect.into(),
            index,
            kind,
        }
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect '{}' (#{}): {}", self.effect, self.index, self.kind)
    }
}

impl std::error::Error for MergeError {}

/// Error reported by a [`Backend`](crate::backend::Backend) implementation.
#[derive(Debug)]
pub struct BackendError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a backend error with an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Crate-level error.
#[derive(Debug)]
pub enum Error {
    /// Effect merging failed; the last good program stays installed.
    Merge(MergeError),
    /// The backend failed while rendering or allocating resources.
    Backend(BackendError),
    /// A disposed pass or composer was used.
    Disposed { pass: String },
    /// A pass index was outside the pass list.
    InvalidPassIndex { index: usize, len: usize },
    /// Invalid configuration value.
    Config(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Merge(e) => write!(f, "merge error: {}", e),
            Error::Backend(e) => write!(f, "backend error: {}", e),
            Error::Disposed { pass } => write!(f, "'{}' was used after being disposed", pass),
            Error::InvalidPassIndex { index, len } => {
                write!(f, "pass index {} out of range (len {})", index, len)
            }
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Merge(e) => Some(e),
            Error::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MergeError> for Error {
    fn from(e: MergeError) -> Self {
        Error::Merge(e)
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        Error::Backend(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
