//! CLI subcommands, implemented as methods on [`crate::App`].

mod merge_requests;
mod repos;
mod run;
