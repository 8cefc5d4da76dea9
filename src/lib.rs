pub mod config;
pub mod errors;
pub mod geometry;
pub mod headless;
pub mod instruction;
pub mod locks;
pub mod serial;
pub mod signal;
pub mod surface;
pub mod window;

pub use errors::{Result, TxnError};
pub use instruction::{Change, Instruction, InstructionEvent, InstructionId, Phase};
pub use window::{ToplevelProtocol, ToplevelState, ToplevelWindow, WindowHandle, WindowId};
