//! Error types for the allocator build pipeline

use thiserror::Error;

/// Specific malformation found while nesting raw exception clauses.
///
/// These describe defects in the *input program's* exception metadata, not bugs
/// in the pipeline: overlapping-but-not-nested ranges, illegally shared
/// handlers, and similar shapes that no valid frontend emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionDefect {
    /// A clause range with start offset at or past its end offset
    EmptyRange,
    /// Two try ranges overlap without one containing the other
    OverlappingTry,
    /// Two handler ranges begin at the same offset
    HandlersAtSameOffset,
    /// One handler range protected by two unrelated try regions
    SharedHandler,
    /// A handler range coincides exactly with an unrelated try range
    HandlerAliasesTry,
    /// Mutually-protecting try ranges whose handlers are not all catch/filter
    MixedMutualProtection,
    /// A protected region nested inside a filter range
    ProtectedRegionInFilter,
    /// A try listed after a try it is nested inside; the table order for
    /// nested trys is inner-first and cannot be repaired by sorting
    InnerTryAfterOuter,
    /// A clause whose try and handler ranges begin at the same offset
    TryHandlerSameStart,
    /// A clause's try/handler/filter ranges do not sit at one nesting level
    HandlerNotContained,
}

impl std::fmt::Display for RegionDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            RegionDefect::EmptyRange => "clause start offset at or past end offset",
            RegionDefect::OverlappingTry => "overlapping try regions",
            RegionDefect::HandlersAtSameOffset => "handlers start at the same offset",
            RegionDefect::SharedHandler => "handler shared between unrelated try regions",
            RegionDefect::HandlerAliasesTry => "handler and try region with the same range",
            RegionDefect::MixedMutualProtection => {
                "mutually-protecting try with a non-catch, non-filter handler"
            }
            RegionDefect::ProtectedRegionInFilter => "protected region inside a filter",
            RegionDefect::InnerTryAfterOuter => {
                "inner try listed after its enclosing try in the clause table"
            }
            RegionDefect::TryHandlerSameStart => {
                "try and handler of one clause start at the same offset"
            }
            RegionDefect::HandlerNotContained => {
                "enclosing region does not contain all of an inner clause"
            }
        };
        f.write_str(msg)
    }
}

/// Build pipeline errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed exception metadata in the input program
    ///
    /// **Triggered by:** clause nesting that is not a proper tree (overlap,
    /// sharing, filter violations), detected while the raw clause list is
    /// inserted into the nesting tree.
    /// **Recovery:** the input unit is rejected; other units are unaffected.
    #[error("invalid protected regions in '{unit}', clause {clause}: {defect}")]
    BadRegions {
        /// Name of the compilation unit being processed
        unit: String,
        /// Index of the offending clause in the source table
        clause: usize,
        /// What was wrong with it
        defect: RegionDefect,
    },

    /// An internal invariant did not hold
    ///
    /// **Triggered by:** verifier mismatches in strict mode, builder state
    /// corruption (e.g. an operand consumed twice), region pointers left
    /// dangling after an edit.
    /// **Recovery:** none; downstream register assignment cannot be trusted.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
    },

    /// A structural capacity was exceeded
    ///
    /// **Triggered by:** more region entries, blocks, or node locations than
    /// the index types can address.
    #[error("limit exceeded: {what} (max {limit})")]
    Limit {
        /// Which capacity ran out
        what: &'static str,
        /// The configured or representational maximum
        limit: usize,
    },
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Fatal for the whole pipeline; results must be discarded
    Fatal,
    /// The current unit is rejected but the pipeline itself is healthy
    Recoverable,
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal {
            message: msg.into(),
        }
    }

    /// Create a malformed-regions error for the given unit and clause
    pub fn bad_regions(unit: impl Into<String>, clause: usize, defect: RegionDefect) -> Self {
        Error::BadRegions {
            unit: unit.into(),
            clause,
            defect,
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::BadRegions { .. } => ErrorSeverity::Recoverable,
            Error::Internal { .. } => ErrorSeverity::Fatal,
            Error::Limit { .. } => ErrorSeverity::Fatal,
        }
    }
}

/// Result type for build pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_regions_message() {
        let err = Error::bad_regions("m0", 3, RegionDefect::OverlappingTry);
        assert_eq!(
            err.to_string(),
            "invalid protected regions in 'm0', clause 3: overlapping try regions"
        );
        assert_eq!(err.classify(), ErrorSeverity::Recoverable);
    }

    #[test]
    fn test_internal_is_fatal() {
        let err = Error::internal("stored try index disagrees with derived index");
        assert_eq!(err.classify(), ErrorSeverity::Fatal);
        assert!(err.to_string().starts_with("internal error:"));
    }
}
