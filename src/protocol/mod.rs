//! Message and command protocol
//!
//! The wire format for object transfer, remote command dispatch and
//! composite batching between workers.

pub mod command;
pub mod message;

pub use command::{
    command_guard, compile_command, parse_arg, parse_ref, Command, CommandArg, ParsedArg,
    ALLOWED_COMMANDS, REF_PREFIX,
};
pub use message::{Envelope, Response};
