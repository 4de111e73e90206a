//! Everything between an incoming pull-request event and the execution
//! contexts handed to the external executor.

pub mod command_builder;
pub mod comment_builder;
pub mod locking;
pub mod models;
pub mod pending_plans;
pub mod project_finder;
pub mod vcs;
pub mod working_dir;

pub use command_builder::ProjectCommandBuilder;
pub use locking::{WorkingDirLock, WorkingDirLocker};
pub use models::{CommandContext, CommandKind, CommentCommand, ProjectCommandContext};
