//! Helpers shared by every multipg crate: the error `Display` macro and the
//! reporting trait the daemons use when surfacing failures.

use std::fmt;

/// Delegate an error struct's `Display` to its kind.
#[macro_export]
macro_rules! impl_fmt_display {
    ($error:ty, $kind:ty) => {
        impl fmt::Display for $error {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.kind, formatter)
            }
        }
    };
}

/// Errors that can describe themselves for operator-facing reports.
pub trait ReportableError: fmt::Display {
    /// The captured backtrace, rendered for logging.
    fn error_backtrace(&self) -> String;

    /// A low-cardinality label for counting occurrences of this error.
    fn metric_label(&self) -> Option<&'static str>;
}
