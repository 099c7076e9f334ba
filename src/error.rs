use std::fmt;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Informative,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Informative => "Informative",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:  {}", self.severity, self.message)
    }
}

/// A failure raised by the data store, carrying every message it buffered.
#[derive(Debug, thiserror::Error)]
#[error("data store operation failed ({} message(s))", .messages.len())]
pub struct StoreError {
    messages: Vec<Diagnostic>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![Diagnostic {
                severity: Severity::Error,
                message: message.into(),
            }],
        }
    }

    /// Wraps `err` and its source chain, one diagnostic per link.
    pub fn from_error(context: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut store_err = Self::new(context);
        let mut cause = Some(err);
        while let Some(e) = cause {
            store_err.push(Severity::Error, e.to_string());
            cause = e.source();
        }
        store_err
    }

    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::from_error(format!("failed to access '{}'", path.display()), err)
    }

    /// Puts a leading message naming the dataset `path`.
    pub fn with_context(mut self, path: &Path) -> Self {
        self.messages.insert(
            0,
            Diagnostic {
                severity: Severity::Error,
                message: format!("failed to process '{}'", path.display()),
            },
        );
        self
    }

    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.messages.push(Diagnostic {
            severity,
            message: message.into(),
        });
    }

    pub fn with(mut self, severity: Severity, message: impl Into<String>) -> Self {
        self.push(severity, message);
        self
    }

    pub fn messages(&self) -> &[Diagnostic] {
        &self.messages
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BearingError {
    /// `mismatched` lists "dataset (reference name)" for each offender.
    #[error("{subject} not in GCS WGS 1984 spatial reference!  Reproject and start again...")]
    Projection {
        subject: &'static str,
        mismatched: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("An unexpected error occurred processing the input file {dataset}")]
    Unexpected {
        dataset: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BearingError {
    pub fn unexpected(dataset: &str, source: anyhow::Error) -> Self {
        BearingError::Unexpected {
            dataset: dataset.to_string(),
            source,
        }
    }
}
