pub mod helpers;
mod secret;

pub use helpers::{env_flag, env_parse, parse_boolean_flag, EnvParseError};
pub use secret::Secret;
