use crate::config::ConfigStore;
use crate::error::DeployResult;
use crate::task::{TaskContext, TaskGraph};
use crate::template::ScriptTemplate;

/// daemontools `run` script for the application server.
pub const SUPERVISOR_RUN: &str = "\
#!/bin/bash
export HOME={{home}}
source $HOME/.bash_profile
cd {{current_path}}
rvm use {{rvm_ruby_string}}
exec bundle exec thin start -p {{thin_port}} -R config.ru -e {{rails_env}} 2>&1
";

/// daemontools `log/run` script.
pub const LOG_RUN: &str = "\
#!/bin/sh
exec multilog t ./main
";

const EXECUTABLE: u32 = 0o755;

/// Register `supervisor:*` and `daemon:*` tasks.
pub fn register(graph: &mut TaskGraph) {
    graph.namespace("supervisor", |ns| {
        ns.task("setup", "Set up the per-user service scanner", setup_svscan);
    });

    graph.namespace("daemon", |ns| {
        ns.task(
            "setup",
            "Write the run scripts and register the supervised daemon",
            setup_daemon,
        );
    });
}

/// The supervisor run script as it would be written right now.
pub fn supervisor_script(config: &ConfigStore) -> DeployResult<String> {
    ScriptTemplate::new(SUPERVISOR_RUN).render_config(config)
}

/// The log run script.
pub fn log_script(config: &ConfigStore) -> DeployResult<String> {
    ScriptTemplate::new(LOG_RUN).render_config(config)
}

fn setup_svscan(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    // Exits non-zero when svscan is already set up.
    let command = ctx.fetch("svscan_setup_command")?;
    ctx.run_tolerant(&command)?;
    Ok(())
}

fn setup_daemon(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let service_dir = ctx.fetch("service_dir")?;
    let service_link = ctx.fetch("service_link")?;
    let run = supervisor_script(ctx.config)?;
    let log = log_script(ctx.config)?;

    ctx.run(&format!("mkdir -p {service_dir}/log"))?;
    ctx.put(&run, &format!("{service_dir}/run"), EXECUTABLE)?;
    ctx.put(&log, &format!("{service_dir}/log/run"), EXECUTABLE)?;
    ctx.run(&format!("ln -nfs {service_dir} {service_link}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_script_binds_port_and_release() {
        let mut config = ConfigStore::new();
        config
            .set("home", "/home/alice")
            .set("current_path", "/var/www/virtual/alice/rails/demo/current")
            .set("rvm_ruby_string", "ree@rails-demo")
            .set("thin_port", 45000)
            .set("rails_env", "production");

        let script = supervisor_script(&config).unwrap();

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("export HOME=/home/alice\n"));
        assert!(script.contains("cd /var/www/virtual/alice/rails/demo/current\n"));
        assert!(script.contains(
            "exec bundle exec thin start -p 45000 -R config.ru -e production 2>&1"
        ));
    }

    #[test]
    fn log_script_has_no_placeholders() {
        let script = log_script(&ConfigStore::new()).unwrap();
        assert_eq!(script, "#!/bin/sh\nexec multilog t ./main\n");
    }
}
