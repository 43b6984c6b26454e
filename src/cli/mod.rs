//! Library halves of the `migrator` subcommands.

pub mod drive;
pub mod seed;
