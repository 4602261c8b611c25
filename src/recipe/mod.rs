//! The shared-hosting deployment recipe: settings, tasks, and the
//! hooks that tie them to the deploy lifecycle.

pub mod daemon;
pub mod deploy;
pub mod proxy;
pub mod runtime;

use crate::config::{ConfigStore, Value};
use crate::error::DeployResult;
use crate::task::TaskGraph;

/// Lowest port handed out when `thin_port` is left unset.
pub const EPHEMERAL_PORT_MIN: u16 = 32768;
/// Highest port handed out when `thin_port` is left unset.
pub const EPHEMERAL_PORT_MAX: u16 = 61000;

/// Register the recipe's settings. Values already in `config` are
/// left alone.
pub fn defaults(config: &mut ConfigStore) {
    config
        .require_setting("user")
        .require_setting("repository")
        .require_setting("application");

    config
        .set_default("domain", Value::Null)
        .default_lazy("thin_port", |_| Ok(random_ephemeral_port().into()))
        .set_default("branch", "master")
        .set_default("git_enable_submodules", true)
        .set_default("keep_releases", 3)
        .set_default("rails_env", "production")
        .set_default("linked_files", vec!["config/database.yml"])
        .set_default("proxy", "htaccess")
        .set_default("svscan_setup_command", "uberspace-setup-svscan")
        .set_default("rvm_install_ruby", "install");

    config
        .default_lazy("deploy_to", |c| {
            Ok(format!(
                "/var/www/virtual/{}/rails/{}",
                c.string("user")?,
                c.string("application")?
            )
            .into())
        })
        .default_lazy("home", |c| Ok(format!("/home/{}", c.string("user")?).into()))
        .default_lazy("service_name", |c| c.require("application"))
        .default_lazy("rvm_ruby_string", |c| {
            Ok(format!("ree@rails-{}", c.string("application")?).into())
        })
        .default_lazy("shared_path", |c| under(c, "deploy_to", "shared"))
        .default_lazy("releases_path", |c| under(c, "deploy_to", "releases"))
        .default_lazy("current_path", |c| under(c, "deploy_to", "current"))
        .default_lazy("release_name", |_| {
            Ok(chrono::Utc::now().format("%Y%m%d%H%M%S").to_string().into())
        })
        .default_lazy("release_path", |c| {
            let name = c.string("release_name")?;
            under(c, "releases_path", &name)
        })
        .default_lazy("public_path", |c| {
            Ok(match c.optional_string("domain")? {
                Some(domain) => format!("/var/www/virtual/{}/{domain}", c.string("user")?),
                None => format!("{}/html", c.string("home")?),
            }
            .into())
        })
        .default_lazy("service_dir", |c| {
            let name = format!("etc/run-{}", c.string("service_name")?);
            under(c, "home", &name)
        })
        .default_lazy("service_link", |c| {
            let name = format!("service/{}", c.string("service_name")?);
            under(c, "home", &name)
        });

    config
        .default_lazy("ssh_user", |c| c.require("user"))
        .set_default("ssh_key", Value::Null)
        .set_default("ssh_port", Value::Null)
        .set_default("forward_agent", true)
        .set_default("pty", false);
}

/// Register every recipe task and wire the lifecycle hooks.
pub fn register(graph: &mut TaskGraph) {
    deploy::register(graph);
    runtime::register(graph);
    daemon::register(graph);
    proxy::register(graph);

    graph
        .before("deploy:setup", "runtime:install_manager")
        .before("deploy:setup", "runtime:install_version")
        .after("deploy:setup", "supervisor:setup")
        .after("deploy:setup", "daemon:setup")
        .after("deploy:setup", "proxy:setup")
        .before("deploy:finalize_update", "deploy:symlink_shared")
        .before("deploy:finalize_update", "deploy:symlink_public")
        .before("deploy:finalize_update", "deploy:fix_permissions")
        .after("deploy:finalize_update", "bundle:install")
        .after("deploy:update_code", "deploy:assets:precompile")
        .after("deploy", "deploy:cleanup")
        .after("deploy:assets:precompile", "deploy:assets:fix_permissions");
}

/// A random port in `EPHEMERAL_PORT_MIN..=EPHEMERAL_PORT_MAX`.
#[must_use]
pub fn random_ephemeral_port() -> u16 {
    let span = u128::from(EPHEMERAL_PORT_MAX - EPHEMERAL_PORT_MIN) + 1;
    let offset = uuid::Uuid::new_v4().as_u128() % span;
    EPHEMERAL_PORT_MIN + u16::try_from(offset).unwrap_or(0)
}

fn under(config: &ConfigStore, base: &str, tail: &str) -> DeployResult<Value> {
    Ok(format!("{}/{tail}", config.string(base)?).into())
}
