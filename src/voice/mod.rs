//! Voice command handling
//!
//! Speech recognition itself is an external process; this module turns its
//! output lines into intents and suppresses duplicate commands.

mod debounce;
mod interpreter;

pub use debounce::{CommandDebouncer, DEFAULT_COOLDOWN};
pub use interpreter::{CommandInterpreter, CommandKeyword, Intent, Utterance, default_phrases};
