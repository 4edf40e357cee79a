// Error taxonomy and the located error object the whole pipeline returns.

use smol_str::SmolStr;

pub type LuaResult<T> = Result<T, LuaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lexer/parser error with a source location
    Syntax,
    /// Operator applied to unsupported operand types without a metamethod
    Type,
    /// Lua-level error: error(), impossible operations, native failures
    Runtime,
    /// Allocation failure
    Memory,
    /// Native API misuse (wrong arity or argument type)
    Argument,
    /// Call-stack depth exceeded the configured limit
    StackOverflow,
    /// Invalid coroutine resume/yield transition
    Coroutine,
    /// Source file read failure
    Io,
    /// Internal control signal for coroutine yields; consumed by the resume
    /// driver, never surfaced to the embedder
    Yield,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Type => "type error",
            ErrorKind::Runtime => "runtime error",
            ErrorKind::Memory => "memory error",
            ErrorKind::Argument => "argument error",
            ErrorKind::StackOverflow => "stack overflow",
            ErrorKind::Coroutine => "coroutine error",
            ErrorKind::Io => "io error",
            ErrorKind::Yield => "yield",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub source: SmolStr,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(source: impl Into<SmolStr>, line: u32, column: u32) -> Self {
        SourceLocation {
            source: source.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.column > 0 {
            write!(f, "{}:{}:{}", self.source, self.line, self.column)
        } else {
            write!(f, "{}:{}", self.source, self.line)
        }
    }
}

#[derive(Debug, Clone)]
pub struct LuaError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// Call-stack snapshot at raise time, innermost first
    pub traceback: Vec<String>,
}

impl LuaError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        LuaError {
            kind,
            message: message.into(),
            location: None,
            traceback: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn syntax(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Syntax, message).with_location(location)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Memory, message)
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Argument, message)
    }

    pub fn stack_overflow() -> Self {
        Self::new(ErrorKind::StackOverflow, "stack overflow")
    }

    pub fn coroutine(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Coroutine, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub(crate) fn yield_signal() -> Self {
        Self::new(ErrorKind::Yield, "")
    }

    pub fn is_yield(&self) -> bool {
        self.kind == ErrorKind::Yield
    }
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}", loc, self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        for frame in &self.traceback {
            write!(f, "\n\t{}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for LuaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LuaError::syntax("unexpected 'end'", SourceLocation::new("chunk", 3, 7));
        assert_eq!(format!("{}", err), "chunk:3:7: unexpected 'end'");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Type.name(), "type error");
        assert_eq!(ErrorKind::StackOverflow.name(), "stack overflow");
    }
}
