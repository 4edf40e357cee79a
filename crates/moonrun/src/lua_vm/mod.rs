mod call_frame;
mod execute;
mod lua_error;
mod lua_state;
mod metamethod;
pub mod number_ops;
pub mod opcode;

pub use call_frame::CallFrame;
pub use execute::coercion;
pub use lua_error::{ErrorKind, LuaError, LuaResult, SourceLocation};
pub use lua_state::{LuaRng, LuaVM, VmOptions, VmStatus};
pub use metamethod::MetaMethod;
pub use opcode::{Instruction, OpCode, disassemble, validate_chunk};
