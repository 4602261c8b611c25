use crate::cmd::shell_quote;
use crate::config::ConfigStore;
use crate::error::DeployResult;
use crate::task::{TaskContext, TaskGraph};

const RVM_SCRIPT: &str = "$HOME/.rvm/scripts/rvm";

/// Register runtime installation (`runtime:*`) and dependency
/// (`bundle:*`) tasks.
pub fn register(graph: &mut TaskGraph) {
    graph.namespace("runtime", |ns| {
        ns.task("install_manager", "Install RVM for the deploy user", install_manager)
            .task(
                "install_version",
                "Install the Ruby interpreter and create the gemset",
                install_version,
            );
    });

    graph.namespace("bundle", |ns| {
        ns.task("install", "Install gems for the new release", bundle_install);
    });
}

/// Split an RVM ruby string into interpreter and gemset:
/// `ree@rails-demo` becomes `("ree", Some("rails-demo"))`.
#[must_use]
pub fn split_ruby_string(ruby: &str) -> (&str, Option<&str>) {
    match ruby.split_once('@') {
        Some((interpreter, gemset)) if !gemset.is_empty() => (interpreter, Some(gemset)),
        Some((interpreter, _)) => (interpreter, None),
        None => (ruby, None),
    }
}

/// Wrap `command` so it runs with the configured Ruby selected.
pub fn in_runtime(config: &ConfigStore, command: &str) -> DeployResult<String> {
    let ruby = config.string("rvm_ruby_string")?;
    Ok(rvm_shell(&format!("rvm use {ruby} > /dev/null && {command}")))
}

fn rvm_shell(command: &str) -> String {
    let script = format!("source \"{RVM_SCRIPT}\" && {command}");
    format!("bash -c {}", shell_quote(&script))
}

fn install_manager(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    ctx.run(&format!(
        "test -s \"{RVM_SCRIPT}\" || curl -sSL https://get.rvm.io | bash -s stable"
    ))?;
    Ok(())
}

fn install_version(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let ruby = ctx.fetch("rvm_ruby_string")?;
    let action = ctx.fetch("rvm_install_ruby")?;
    let (interpreter, gemset) = split_ruby_string(&ruby);

    ctx.run(&rvm_shell(&format!("rvm {action} {interpreter}")))?;
    if gemset.is_some() {
        ctx.run(&rvm_shell(&format!("rvm use {ruby} --create")))?;
    }
    Ok(())
}

fn bundle_install(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let release = ctx.fetch("release_path")?;
    let shared = ctx.fetch("shared_path")?;

    let command = in_runtime(
        ctx.config,
        &format!(
            "cd {release} && bundle install --gemfile {release}/Gemfile \
             --path {shared}/bundle --deployment --quiet --without development test"
        ),
    )?;
    ctx.run(&command)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruby_string_parts() {
        assert_eq!(split_ruby_string("ree@rails-demo"), ("ree", Some("rails-demo")));
        assert_eq!(split_ruby_string("ruby-3.3.0"), ("ruby-3.3.0", None));
        assert_eq!(split_ruby_string("ruby-3.3.0@"), ("ruby-3.3.0", None));
    }

    #[test]
    fn runtime_wrapper_selects_ruby() {
        let mut config = ConfigStore::new();
        config.set("rvm_ruby_string", "ree@rails-demo");

        let cmd = in_runtime(&config, "bundle -v").unwrap();

        assert!(cmd.starts_with("bash -c '"));
        assert!(cmd.contains("source \"$HOME/.rvm/scripts/rvm\""));
        assert!(cmd.contains("rvm use ree@rails-demo > /dev/null && bundle -v"));
    }
}
