//! Command-line administration of a JSON Web Key Set
//!
//! The binary is a thin layer over [`jwks_admin`]: it resolves a data
//! directory, opens the file-backed stores in it and dispatches
//! subcommands. The modules are exposed so the commands can be exercised
//! without spawning a process.

pub mod commands;
pub mod error;
pub mod output;
pub mod workspace;
