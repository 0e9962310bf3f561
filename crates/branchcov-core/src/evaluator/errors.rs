use thiserror::Error;

/// Evaluator-specific error types.
///
/// Everything except `Raised`, `UnexpectedJump` and `Parse` is turned into
/// a Ruby exception inside the program, so `rescue` can see it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluatorError {
    #[error("{operation}: expected {expected}, got {actual}")]
    TypeError {
        operation: String,
        expected: String,
        actual: String,
    },

    #[error("{left_type} can't be combined with {right_type} by {operation}")]
    BinaryTypeError {
        operation: String,
        left_type: String,
        right_type: String,
    },

    #[error("undefined local variable or method '{name}'")]
    UndefinedName { name: String },

    #[error("undefined method '{method}' for an instance of {receiver}")]
    UndefinedMethod { method: String, receiver: String },

    #[error("wrong number of arguments (given {given}, expected {expected})")]
    Arity { given: usize, expected: String },

    #[error("divided by 0")]
    DivisionByZero,

    #[error("index {index} outside of array bounds")]
    IndexOutOfRange { index: i64 },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("{construct} is not supported")]
    Unsupported { construct: String },

    #[error("integer overflow in {operation}")]
    Overflow { operation: String },

    #[error("stack level too deep")]
    StackTooDeep,

    #[error("{class}: {message}")]
    Raised { class: String, message: String },

    #[error("Unexpected {keyword} outside of a loop or method")]
    UnexpectedJump { keyword: &'static str },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EvaluatorError {
    /// Create a type error for unary operations
    pub fn unary_type_error(operation: &str, expected: &str, actual: &str) -> Self {
        Self::TypeError {
            operation: operation.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a type error for binary operations
    pub fn binary_type_error(operation: &str, left_type: &str, right_type: &str) -> Self {
        Self::BinaryTypeError {
            operation: operation.to_string(),
            left_type: left_type.to_string(),
            right_type: right_type.to_string(),
        }
    }

    pub fn undefined_name(name: &str) -> Self {
        Self::UndefinedName {
            name: name.to_string(),
        }
    }

    pub fn undefined_method(method: &str, receiver: &str) -> Self {
        Self::UndefinedMethod {
            method: method.to_string(),
            receiver: receiver.to_string(),
        }
    }

    pub fn unsupported(construct: impl Into<String>) -> Self {
        Self::Unsupported {
            construct: construct.into(),
        }
    }

    pub fn arity(given: usize, expected: impl Into<String>) -> Self {
        Self::Arity {
            given,
            expected: expected.into(),
        }
    }

    /// Ruby exception class raised for this error inside a program
    pub fn exception_class(&self) -> &str {
        match self {
            Self::TypeError { .. } | Self::BinaryTypeError { .. } => "TypeError",
            Self::UndefinedName { .. } => "NameError",
            Self::UndefinedMethod { .. } => "NoMethodError",
            Self::Arity { .. } => "ArgumentError",
            Self::DivisionByZero => "ZeroDivisionError",
            Self::IndexOutOfRange { .. } => "IndexError",
            Self::KeyNotFound { .. } => "KeyError",
            Self::Unsupported { .. } => "NotImplementedError",
            Self::Overflow { .. } => "RangeError",
            Self::StackTooDeep => "SystemStackError",
            Self::Raised { class, .. } => class,
            Self::UnexpectedJump { .. } => "LocalJumpError",
            Self::Parse(_) => "SyntaxError",
        }
    }
}
