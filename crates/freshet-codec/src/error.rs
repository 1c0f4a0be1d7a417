use thiserror::Error;

/// Errors returned by microbatch building and wire codec operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Fixed batch overhead alone exceeds the configured byte budget.
    ///
    /// This is a configuration error: no batch can ever be packed under
    /// such a budget.
    #[error("batch overhead of {overhead} bytes exceeds byte budget of {budget}")]
    OverheadExceedsBudget { overhead: usize, budget: usize },
    /// A single row exceeds the entire batch byte budget.
    ///
    /// Also a configuration error, not a runtime condition to recover from.
    #[error("row of {size} bytes is too large to fit in any batch (budget {budget})")]
    RowTooLarge { size: usize, budget: usize },
    /// Batch-level schema/target validation failure.
    #[error("invalid batch: {0}")]
    InvalidBatch(&'static str),
    /// Declared lengths or counts run past the end of the buffer.
    #[error("truncated buffer: {0}")]
    Truncated(&'static str),
    /// The buffer holds more bytes than its declared contents account for.
    #[error("trailing bytes after batch: consumed {consumed} of {len}")]
    TrailingBytes { consumed: usize, len: usize },
}
