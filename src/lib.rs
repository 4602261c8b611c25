//! Hook-driven deployment recipes for shared hosting.
//!
//! hookdeploy provisions and deploys a web application to a
//! shared host over SSH: it installs the language runtime, writes
//! daemontools run scripts for the application server, puts a
//! reverse proxy rule in front of it, and rolls out releases with
//! shared configuration symlinked in.
//!
//! # Overview
//!
//! A deployment is a [`Pipeline`] built from four pieces:
//!
//! - A [`ConfigStore`] of settings whose defaults are computed
//!   lazily, once, from other settings
//! - A [`TaskGraph`] of named tasks (`deploy:restart`,
//!   `daemon:setup`, ...) with `before`/`after` hooks
//! - A [`RemoteSession`](remote::RemoteSession) that runs commands
//!   and uploads files (e.g. [`SshSession`](remote::ssh::SshSession))
//! - [`ScriptTemplate`]s rendering the run scripts and proxy rules
//!
//! # Task order
//!
//! Running a task expands it depth-first: its `before` hooks in
//! registration order, the task itself, and then its `after` hooks,
//! each hook expanded the same way. A task reachable along two
//! paths runs once. The first failure stops the run.
//!
//! ```text
//! deploy
//!   deploy:update
//!     deploy:update_code
//!       deploy:checkout
//!       deploy:symlink_shared      (before deploy:finalize_update)
//!       deploy:symlink_public      (before deploy:finalize_update)
//!       deploy:fix_permissions     (before deploy:finalize_update)
//!       deploy:finalize_update
//!       bundle:install             (after deploy:finalize_update)
//!     deploy:assets:precompile     (after deploy:update_code)
//!     deploy:assets:fix_permissions
//!     deploy:create_symlink
//!   deploy:restart
//!   deploy:cleanup                 (after deploy)
//! ```
//!
//! # Examples
//!
//! Create an `xtask/src/main.rs` in your project:
//!
//! ```rust,no_run
//! use hookdeploy::{ConfigStore, Pipeline};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = ConfigStore::new();
//!     config
//!         .set("application", "blog")
//!         .set("user", "alice")
//!         .set("repository", "git@github.com:alice/blog.git")
//!         .set("domain", "blog.example.com");
//!
//!     Pipeline::new(config).run()?;
//!     Ok(())
//! }
//! ```
//!
//! Then use `cargo xtask` subcommands:
//!
//! ```sh
//! # Install RVM, Ruby, the run scripts and the proxy rules
//! cargo xtask setup alice.example-host.net
//!
//! # Roll out a release
//! cargo xtask deploy alice.example-host.net
//!
//! # See what would run, without connecting
//! cargo xtask plan deploy
//! cargo xtask deploy alice.example-host.net --dry-run
//! ```
//!
//! ## Custom tasks
//!
//! ```rust,no_run
//! use hookdeploy::{ConfigStore, Pipeline};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = ConfigStore::new();
//!     config
//!         .set("application", "shop")
//!         .set("user", "bob")
//!         .set("repository", "https://example.com/bob/shop.git");
//!
//!     Pipeline::new(config)
//!         .task("db:migrate", "Run pending migrations", |ctx| {
//!             let release = ctx.fetch("release_path")?;
//!             ctx.run(&format!("cd {release} && bundle exec rake db:migrate"))?;
//!             Ok(())
//!         })
//!         .after("bundle:install", "db:migrate")
//!         .run()?;
//!     Ok(())
//! }
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod cmd;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod recipe;
pub mod remote;
pub mod task;
pub mod template;

pub use config::{ConfigStore, Value};
pub use error::{DeployError, DeployResult};
pub use pipeline::Pipeline;
pub use remote::dry_run::DryRunSession;
pub use remote::ssh::SshSession;
pub use remote::{Credentials, RemoteCommand, RemoteSession, UploadedFile};
pub use task::{TaskContext, TaskGraph};
pub use template::ScriptTemplate;
