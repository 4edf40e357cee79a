mod lua_function;
mod lua_table;
mod lua_thread;
mod lua_userdata;
mod lua_value;

pub use lua_function::{Chunk, LuaFunction, LuaUpvalue, NativeFn, NativeFunction, UpvalueDesc};
pub use lua_table::LuaTable;
pub use lua_thread::{CoroutineStatus, LuaThread, ThreadContext};
pub use lua_userdata::LuaUserdata;
pub use lua_value::{LuaStr, LuaValue, float_to_integer, str_hash};
