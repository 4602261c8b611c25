//! Hook project-specific tasks into the deploy lifecycle.
//!
//! Migrations run right after gems are installed, and a marker file
//! is written once the new release is live. The application server
//! sits behind Caddy instead of an `.htaccess` rule.
//!
//! ```sh
//! cargo xtask plan deploy
//! cargo xtask deploy bob.example-host.net --dry-run
//! cargo xtask invoke db:migrate bob.example-host.net
//! ```

use hookdeploy::{ConfigStore, Pipeline};

fn main() -> anyhow::Result<()> {
    let mut config = ConfigStore::new();
    config
        .set("application", "shop")
        .set("user", "bob")
        .set("repository", "https://example.com/bob/shop.git")
        .set("proxy", "caddy")
        .set("rvm_ruby_string", "ruby-3.3.0@shop");
    config.default_lazy("deployed_marker", |c| {
        Ok(format!("{}/DEPLOYED_AT", c.string("shared_path")?).into())
    });

    Pipeline::new(config)
        .task("db:migrate", "Run pending migrations", |ctx| {
            let release = ctx.fetch("release_path")?;
            let env = ctx.fetch("rails_env")?;
            ctx.run(&format!(
                "cd {release} && RAILS_ENV={env} bundle exec rake db:migrate"
            ))?;
            Ok(())
        })
        .task("deploy:mark", "Record when the release went live", |ctx| {
            let marker = ctx.fetch("deployed_marker")?;
            let release = ctx.fetch("release_name")?;
            ctx.put(&format!("{release}\n"), &marker, 0o644)?;
            Ok(())
        })
        .after("bundle:install", "db:migrate")
        .after("deploy:create_symlink", "deploy:mark")
        .run()?;
    Ok(())
}
