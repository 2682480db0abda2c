// EmberCL Conditions - Typed Error Taxonomy
//
// The only error channel of the core. Raised through ControlSignal::Error
// and propagated like any other nonlocal exit; the core never recovers on
// its own: restarts and handlers belong to the external condition system.

use std::fmt;

use crate::symbol::SymbolId;
use crate::types::{NodeId, TypeSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum LispError {
    /// A value of the wrong type reached an operation. Carries the offending
    /// value and the expected type descriptor.
    Type { datum: NodeId, expected: TypeSpec },
    /// Malformed special form, redefinition of a special operator, etc.
    Program(String),
    /// Unmatched GO/RETURN-FROM/THROW target.
    Control(String),
    Package(String),
    UndefinedFunction(SymbolId),
    UnboundVariable(SymbolId),
    WrongNumberOfArguments { name: String, got: usize },
    DivisionByZero,
    /// Eval recursion exceeded the configured depth limit.
    StackOverflow,
    /// ERROR/SIGNAL payload: format control plus arguments, uninterpreted
    /// by the core (the format engine is external).
    Simple {
        control: String,
        args: Vec<NodeId>,
    },
    /// Catch-all for failures with no more specific class.
    General(String),
}

impl fmt::Display for LispError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LispError::Type { datum, expected } => {
                write!(
                    f,
                    "wrong type: value #{} is not of type {}",
                    datum.0, expected
                )
            }
            LispError::Program(msg) => write!(f, "program error: {}", msg),
            LispError::Control(msg) => write!(f, "control error: {}", msg),
            LispError::Package(msg) => write!(f, "package error: {}", msg),
            LispError::UndefinedFunction(sym) => {
                write!(f, "undefined function #{}", sym.0)
            }
            LispError::UnboundVariable(sym) => {
                write!(f, "unbound variable #{}", sym.0)
            }
            LispError::WrongNumberOfArguments { name, got } => {
                write!(f, "wrong number of arguments for {} ({} supplied)", name, got)
            }
            LispError::DivisionByZero => write!(f, "arithmetic error: division by zero"),
            LispError::StackOverflow => write!(f, "evaluation depth limit exceeded"),
            LispError::Simple { control, args } => {
                write!(f, "error: {}", control)?;
                if !args.is_empty() {
                    write!(f, " ({} argument(s))", args.len())?;
                }
                Ok(())
            }
            LispError::General(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl LispError {
    pub fn wrong_type(datum: NodeId, expected: TypeSpec) -> Self {
        LispError::Type { datum, expected }
    }

    /// Whether this is the unmatched-unwind class of failure, which the
    /// embedder must report distinctly from ordinary typed errors.
    pub fn is_control_error(&self) -> bool {
        matches!(self, LispError::Control(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        let e = LispError::Type {
            datum: NodeId(7),
            expected: TypeSpec::Cons,
        };
        assert_eq!(e.to_string(), "wrong type: value #7 is not of type CONS");

        let e = LispError::WrongNumberOfArguments {
            name: "CAR".to_string(),
            got: 3,
        };
        assert_eq!(
            e.to_string(),
            "wrong number of arguments for CAR (3 supplied)"
        );
    }

    #[test]
    fn test_control_error_classification() {
        assert!(LispError::Control("no such tag".into()).is_control_error());
        assert!(!LispError::DivisionByZero.is_control_error());
    }
}
