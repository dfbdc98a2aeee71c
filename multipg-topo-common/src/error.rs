use std::fmt;

use backtrace::Backtrace;
use multipg_common::{impl_fmt_display, ReportableError};
use thiserror::Error;

/// An error returned by a topology backend or by the typed store API built
/// on top of one.
///
/// Applications reason about the kind, never the message text: two errors
/// are "the same" when [`TopoErrorIntrospect`] reports the same kind,
/// regardless of how many layers of context were wrapped around them.
#[derive(Debug)]
pub struct TopoError {
    kind: TopoErrorKind,
    pub backtrace: Backtrace,
}

#[derive(Debug, Clone, Error)]
pub enum TopoErrorKind {
    #[error("node doesn't exist: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node version mismatch: {0}")]
    BadVersion(String),

    #[error("node not empty: {0}")]
    NodeNotEmpty(String),

    #[error("interrupted operation: {0}")]
    Interrupted(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("no update needed: {0}")]
    NoUpdateNeeded(String),

    #[error("partial result: {0}")]
    PartialResult(String),

    #[error("no such topology implementation: {0}")]
    NoImplementation(String),

    #[error("server resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unexpected error: {0}")]
    Internal(String),
}

impl TopoError {
    pub fn no_node(node: impl fmt::Display) -> Self {
        TopoErrorKind::NoNode(node.to_string()).into()
    }

    pub fn node_exists(node: impl fmt::Display) -> Self {
        TopoErrorKind::NodeExists(node.to_string()).into()
    }

    pub fn bad_version(node: impl fmt::Display) -> Self {
        TopoErrorKind::BadVersion(node.to_string()).into()
    }

    pub fn node_not_empty(msg: impl fmt::Display) -> Self {
        TopoErrorKind::NodeNotEmpty(msg.to_string()).into()
    }

    pub fn interrupted(msg: impl fmt::Display) -> Self {
        TopoErrorKind::Interrupted(msg.to_string()).into()
    }

    pub fn timeout(msg: impl fmt::Display) -> Self {
        TopoErrorKind::Timeout(msg.to_string()).into()
    }

    pub fn no_update_needed() -> Self {
        TopoErrorKind::NoUpdateNeeded("skipped".to_owned()).into()
    }

    pub fn partial_result(msg: impl fmt::Display) -> Self {
        TopoErrorKind::PartialResult(msg.to_string()).into()
    }

    pub fn no_implementation(name: impl fmt::Display) -> Self {
        TopoErrorKind::NoImplementation(name.to_string()).into()
    }

    pub fn resource_exhausted(msg: impl fmt::Display) -> Self {
        TopoErrorKind::ResourceExhausted(msg.to_string()).into()
    }

    pub fn internal(msg: impl fmt::Display) -> Self {
        TopoErrorKind::Internal(msg.to_string()).into()
    }

    /// Prepend context to the message while keeping the kind, so callers can
    /// still match the wrapped error by kind.
    pub fn wrap(self, context: impl fmt::Display) -> Self {
        let kind = match self.kind {
            TopoErrorKind::NoNode(m) => TopoErrorKind::NoNode(format!("{}: {}", context, m)),
            TopoErrorKind::NodeExists(m) => {
                TopoErrorKind::NodeExists(format!("{}: {}", context, m))
            }
            TopoErrorKind::BadVersion(m) => {
                TopoErrorKind::BadVersion(format!("{}: {}", context, m))
            }
            TopoErrorKind::NodeNotEmpty(m) => {
                TopoErrorKind::NodeNotEmpty(format!("{}: {}", context, m))
            }
            TopoErrorKind::Interrupted(m) => {
                TopoErrorKind::Interrupted(format!("{}: {}", context, m))
            }
            TopoErrorKind::Timeout(m) => TopoErrorKind::Timeout(format!("{}: {}", context, m)),
            TopoErrorKind::NoUpdateNeeded(m) => {
                TopoErrorKind::NoUpdateNeeded(format!("{}: {}", context, m))
            }
            TopoErrorKind::PartialResult(m) => {
                TopoErrorKind::PartialResult(format!("{}: {}", context, m))
            }
            TopoErrorKind::NoImplementation(m) => {
                TopoErrorKind::NoImplementation(format!("{}: {}", context, m))
            }
            TopoErrorKind::ResourceExhausted(m) => {
                TopoErrorKind::ResourceExhausted(format!("{}: {}", context, m))
            }
            TopoErrorKind::Internal(m) => TopoErrorKind::Internal(format!("{}: {}", context, m)),
        };
        TopoError {
            kind,
            backtrace: self.backtrace,
        }
    }
}

/// Kind predicates for [`TopoError`]. Callers use these instead of comparing
/// message strings.
pub trait TopoErrorIntrospect {
    fn is_no_node(&self) -> bool;
    fn is_node_exists(&self) -> bool;
    fn is_bad_version(&self) -> bool;
    fn is_node_not_empty(&self) -> bool;
    fn is_interrupted(&self) -> bool;
    fn is_timeout(&self) -> bool;
    fn is_no_update_needed(&self) -> bool;
    fn is_partial_result(&self) -> bool;
    fn is_no_implementation(&self) -> bool;
    fn is_resource_exhausted(&self) -> bool;
}

impl TopoErrorIntrospect for TopoError {
    fn is_no_node(&self) -> bool {
        matches!(self.kind, TopoErrorKind::NoNode(_))
    }

    fn is_node_exists(&self) -> bool {
        matches!(self.kind, TopoErrorKind::NodeExists(_))
    }

    fn is_bad_version(&self) -> bool {
        matches!(self.kind, TopoErrorKind::BadVersion(_))
    }

    fn is_node_not_empty(&self) -> bool {
        matches!(self.kind, TopoErrorKind::NodeNotEmpty(_))
    }

    fn is_interrupted(&self) -> bool {
        matches!(self.kind, TopoErrorKind::Interrupted(_))
    }

    fn is_timeout(&self) -> bool {
        matches!(self.kind, TopoErrorKind::Timeout(_))
    }

    fn is_no_update_needed(&self) -> bool {
        matches!(self.kind, TopoErrorKind::NoUpdateNeeded(_))
    }

    fn is_partial_result(&self) -> bool {
        matches!(self.kind, TopoErrorKind::PartialResult(_))
    }

    fn is_no_implementation(&self) -> bool {
        matches!(self.kind, TopoErrorKind::NoImplementation(_))
    }

    fn is_resource_exhausted(&self) -> bool {
        matches!(self.kind, TopoErrorKind::ResourceExhausted(_))
    }
}

impl ReportableError for TopoError {
    fn error_backtrace(&self) -> String {
        format!("{:#?}", self.backtrace)
    }

    fn metric_label(&self) -> Option<&'static str> {
        match self.kind {
            TopoErrorKind::BadVersion(_) => Some("topo.conflict"),
            TopoErrorKind::Timeout(_) => Some("topo.timeout"),
            TopoErrorKind::Interrupted(_) => Some("topo.interrupted"),
            TopoErrorKind::PartialResult(_) => Some("topo.partial_result"),
            _ => None,
        }
    }
}

impl From<TopoErrorKind> for TopoError {
    fn from(kind: TopoErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::new(),
        }
    }
}

impl std::error::Error for TopoError {}

impl_fmt_display!(TopoError, TopoErrorKind);
