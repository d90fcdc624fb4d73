//! Transport clients used by the platform adapters and tasks.
//!
//! - [`http`]: JSON REST client with bearer auth, error mapping and page markers
//! - [`git`]: Local checkouts through the `git` CLI (clone, branch, status, commit, push)
//! - [`github_app_auth`]: GitHub App JWTs and cached installation tokens

pub mod git;
pub mod github_app_auth;
pub mod http;
