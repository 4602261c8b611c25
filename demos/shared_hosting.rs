//! Deploy a Rails application to an Uberspace-style shared host.
//!
//! Settings can also come from a YAML file passed with `--config`,
//! and any of them can be overridden with `--set key=value`.
//!
//! ```sh
//! # Install RVM and Ruby, write the run scripts and proxy rules
//! cargo xtask setup alice.example-host.net
//!
//! # Roll out a release from the `main` branch
//! cargo xtask deploy alice.example-host.net --set branch=main
//!
//! # Inspect without connecting
//! cargo xtask plan deploy
//! cargo xtask config --json
//! ```

use hookdeploy::{ConfigStore, Pipeline};

fn main() -> anyhow::Result<()> {
    let mut config = ConfigStore::new();
    config
        .set("application", "blog")
        .set("user", "alice")
        .set("repository", "git@github.com:alice/blog.git")
        .set("domain", "blog.example.com")
        .set("branch", "main")
        .set("keep_releases", 5)
        .set(
            "linked_files",
            vec!["config/database.yml", "config/master.key"],
        )
        .set("ssh_key", "~/.ssh/id_uberspace");

    Pipeline::new(config).run()?;
    Ok(())
}
