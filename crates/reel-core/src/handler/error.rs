use thiserror::Error;

/// Failure reported by a command handler or an event listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Failure whose reason is meant for the job owner.
    #[error("{0}")]
    Rejected(String),

    /// Internal failure; the reason is for logs only.
    #[error("handler failed: {0}")]
    Failed(String),

    /// Handler completed normally but its consume policy treats completion as failure.
    #[error("handler completed with a negative outcome")]
    NegativeOutcome,

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        HandlerError::Rejected(reason.into())
    }

    pub fn failed(reason: impl ToString) -> Self {
        HandlerError::Failed(reason.to_string())
    }

    /// Reason safe to show to the job owner; internal failures collapse into `fallback`.
    pub fn public_reason<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self {
            HandlerError::Rejected(reason) => reason,
            _ => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejections_expose_their_reason() {
        let fallback = "Recorder failed.";
        assert_eq!(
            HandlerError::rejected("Uploader service failed.").public_reason(fallback),
            "Uploader service failed."
        );
        assert_eq!(
            HandlerError::failed("socket reset").public_reason(fallback),
            fallback
        );
        assert_eq!(HandlerError::NegativeOutcome.public_reason(fallback), fallback);
    }
}
