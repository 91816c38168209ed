//! Error types for meldstripe

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coding or striping
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Field width outside the supported range
    #[error("Unsupported field width: {0} bits (supported: 2-8)")]
    UnsupportedFieldWidth(u32),

    /// Polynomial does not generate the whole multiplicative group
    #[error("Polynomial {polynomial:#x} is not primitive over GF(2^{bits})")]
    NonPrimitivePolynomial { bits: u32, polynomial: u32 },

    /// Field cannot hold distinct evaluation points for every symbol
    #[error("GF({field_size}) is too small for a code word of {word_size} symbols")]
    FieldTooSmall { field_size: usize, word_size: usize },

    /// Invalid coding or striping configuration
    #[error("Invalid coding configuration: {0}")]
    InvalidConfig(String),

    /// Backend cannot operate over the requested field
    #[error("Coding backend '{backend}' does not support GF({field_size})")]
    UnsupportedBackend {
        backend: &'static str,
        field_size: usize,
    },

    // =========================================================================
    // Arithmetic Errors
    // =========================================================================
    /// Inverse or division of zero
    #[error("Division by zero in GF({0})")]
    DivideByZero(usize),

    /// Gauss-Jordan elimination found no pivot
    #[error("Matrix is singular: no nonzero pivot in column {column}")]
    SingularMatrix { column: usize },

    /// Operand shapes do not line up
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    // =========================================================================
    // Erasure Errors
    // =========================================================================
    /// More symbols missing than checksums available
    #[error("Uncorrectable erasure: {invalid} symbols missing, at most {correctable} can be recovered")]
    Uncorrectable { invalid: usize, correctable: usize },

    /// A column that must be computed was not handed over as a target
    #[error("Column {0} must be supplied as a calculation target")]
    MissingTarget(usize),

    /// A column the coder reads from was not supplied
    #[error("Column {0} is required as a source but was not supplied")]
    MissingSource(usize),

    /// Target buffer cannot hold the computed height
    #[error("Column {column} holds {capacity} bytes but {height} are needed")]
    ColumnTooShort {
        column: usize,
        capacity: usize,
        height: usize,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Reading the unstriped input failed
    #[error("Failed to read stripe input: {0}")]
    InputIo(#[source] io::Error),

    /// Writing the unstriped output failed
    #[error("Failed to write stripe output: {0}")]
    OutputIo(#[source] io::Error),

    /// Reading or writing one column failed
    #[error("I/O error on column {column}: {source}")]
    ColumnIo {
        column: usize,
        #[source]
        source: io::Error,
    },

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// Several pipeline threads failed; the first is reported
    #[error("{primary} ({} suppressed: {})", .suppressed.len(), Suppressed(.suppressed))]
    Pipeline {
        #[source]
        primary: Box<Error>,
        suppressed: Vec<Error>,
    },

    /// A pool thread panicked while running a task
    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),

    /// The pool no longer accepts tasks
    #[error("Worker pool '{0}' is shut down")]
    PoolShutdown(String),

    /// A frame queue lost its counterpart
    #[error("Frame queue closed: {0}")]
    QueueClosed(&'static str),
}

impl Error {
    /// Returns true for failures raised by an input or output collaborator
    pub fn is_io(&self) -> bool {
        match self {
            Error::Io(_) | Error::InputIo(_) | Error::OutputIo(_) | Error::ColumnIo { .. } => true,
            Error::Pipeline { primary, .. } => primary.is_io(),
            _ => false,
        }
    }

    /// Errors attached to this one as secondary causes
    pub fn suppressed(&self) -> &[Error] {
        match self {
            Error::Pipeline { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Reduce the failures of one pipeline run to a single error.
    ///
    /// Failures are expected in reporting order (reader first, then
    /// writers by column). The first I/O failure wins, or the first failure
    /// when none is I/O. A failure is dropped as a repeat only when an
    /// already kept one has the same variant, column, I/O error kind and
    /// message.
    pub fn aggregate(failures: Vec<Error>) -> Option<Error> {
        let primary_at = failures
            .iter()
            .position(Error::is_io)
            .or(if failures.is_empty() { None } else { Some(0) })?;

        let mut failures = failures;
        let primary = failures.remove(primary_at);
        let mut suppressed: Vec<Error> = Vec::new();
        for failure in failures {
            let repeat = failure.is_repeat_of(&primary)
                || suppressed.iter().any(|kept| failure.is_repeat_of(kept));
            if !repeat {
                suppressed.push(failure);
            }
        }

        if suppressed.is_empty() {
            Some(primary)
        } else {
            Some(Error::Pipeline {
                primary: Box::new(primary),
                suppressed,
            })
        }
    }

    fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(e) | Error::InputIo(e) | Error::OutputIo(e) | Error::ColumnIo { source: e, .. } => {
                Some(e.kind())
            }
            _ => None,
        }
    }

    /// Same variant and source as `other`
    fn is_repeat_of(&self, other: &Error) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.io_kind() == other.io_kind()
            && self.to_string() == other.to_string()
    }
}

struct Suppressed<'a>(&'a [Error]);

impl fmt::Display for Suppressed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}
