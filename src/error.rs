//! Typed conditions that callers need to tell apart
//!
//! Everything else travels as a plain `eyre::Report`; these ride inside one
//! and can be recovered with `report.downcast_ref::<RexError>()`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RexError {
    /// A dir-spec named an explicit in-sandbox target (`<path>:<target>`)
    #[error("non-empty target not implemented: '{spec}'")]
    NotImplemented { spec: String },

    #[error("no directories given: need at least one layer or sub-mount")]
    EmptyPlan,

    /// A non-directory sits where a mount-point directory is needed
    #[error("'{}' exists but is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// The working directory would climb above the sandbox root
    #[error("working directory '{}' leaves the sandbox root", path.display())]
    CwdOutsideRoot { path: PathBuf },

    /// The path contains a separator that the overlay option syntax reserves
    #[error("path '{}' cannot be used as an overlay layer (contains ':' or ',')", path.display())]
    UnsupportedPath { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_implemented_message_names_argument() {
        let err = RexError::NotImplemented {
            spec: "/src:/custom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "non-empty target not implemented: '/src:/custom'"
        );
    }

    #[test]
    fn test_downcast_through_report() {
        let report = eyre::Report::new(RexError::EmptyPlan);
        assert!(matches!(
            report.downcast_ref::<RexError>(),
            Some(RexError::EmptyPlan)
        ));
    }
}
