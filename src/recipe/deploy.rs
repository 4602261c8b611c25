use tracing::info;

use crate::cmd::shell_quote;
use crate::error::{DeployError, DeployResult};
use crate::recipe::{proxy, runtime};
use crate::task::{TaskContext, TaskGraph};

const RELEASE_NAME_LEN: usize = 14;

/// Register the `deploy:*` tasks.
pub fn register(graph: &mut TaskGraph) {
    graph.group(
        "deploy",
        "Deploy a new release and restart the application",
        &["deploy:update", "deploy:restart"],
    );

    graph.namespace("deploy", |ns| {
        ns.group(
            "update",
            "Check out a new release and point current at it",
            &["deploy:update_code", "deploy:create_symlink"],
        )
        .group(
            "update_code",
            "Check out a new release and prepare it",
            &["deploy:checkout", "deploy:finalize_update"],
        )
        .task("setup", "Create the release directory layout", setup)
        .task("checkout", "Clone the repository into a new release", checkout)
        .task(
            "finalize_update",
            "Hook point for release preparation",
            |_| Ok(()),
        )
        .task("create_symlink", "Point current at the new release", create_symlink)
        .task("cleanup", "Remove releases beyond keep_releases", cleanup)
        .task("start", "Start the supervised daemon", |ctx| control(ctx, "-u"))
        .task("stop", "Stop the supervised daemon", |ctx| control(ctx, "-d"))
        .task("restart", "Restart the supervised daemon", |ctx| control(ctx, "-du"))
        .task("symlink_shared", "Link shared config into the release", symlink_shared)
        .task("symlink_public", "Publish the release's public directory", symlink_public)
        .task("fix_permissions", "Make release directories world-readable", fix_permissions)
        .namespace("assets", |ns| {
            ns.task("precompile", "Compile assets into the shared asset directory", precompile)
                .task(
                    "fix_permissions",
                    "Make compiled assets world-readable",
                    fix_asset_permissions,
                );
        });
    });
}

fn setup(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let deploy_to = ctx.fetch("deploy_to")?;
    let releases = ctx.fetch("releases_path")?;
    let shared = ctx.fetch("shared_path")?;

    ctx.run(&format!(
        "mkdir -p {deploy_to} {releases} {shared} {shared}/config {shared}/assets"
    ))?;
    Ok(())
}

fn checkout(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let repository = ctx.fetch("repository")?;
    let branch = ctx.fetch("branch")?;
    let release = ctx.fetch("release_path")?;
    let recursive = if ctx.config.boolean("git_enable_submodules")? {
        " --recursive"
    } else {
        ""
    };

    ctx.run(&format!(
        "git clone -q --depth 1 --branch {branch}{recursive} {repository} {release}"
    ))?;
    ctx.run(&format!("cd {release} && git rev-parse HEAD > REVISION"))?;
    Ok(())
}

fn create_symlink(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let release = ctx.fetch("release_path")?;
    let current = ctx.fetch("current_path")?;

    ctx.run(&format!("ln -nfs {release} {current}"))?;
    Ok(())
}

fn cleanup(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let keep = ctx.config.integer("keep_releases")?;
    let keep = usize::try_from(keep)
        .ok()
        .filter(|k| *k > 0)
        .ok_or_else(|| DeployError::InvalidSetting {
            key: "keep_releases".into(),
            reason: format!("must be at least 1, found {keep}"),
        })?;
    let releases = ctx.fetch("releases_path")?;

    let listing = ctx.capture(&format!("ls -1 {releases}"))?;
    let old = releases_to_prune(&listing, keep);
    if old.is_empty() {
        info!(keep, "no old releases to remove");
        return Ok(());
    }

    info!(keep, removing = old.len(), "removing old releases");
    let paths: Vec<String> = old
        .iter()
        .map(|r| shell_quote(&format!("{releases}/{r}")))
        .collect();
    ctx.run(&format!("rm -rf {}", paths.join(" ")))?;
    Ok(())
}

/// Release directory names to delete so that only the newest `keep`
/// remain. Release names are timestamps, so they sort by age. Lines
/// that are not release names (ssh or shell noise on stderr) are
/// skipped.
#[must_use]
pub fn releases_to_prune(listing: &str, keep: usize) -> Vec<String> {
    let mut releases: Vec<&str> = listing
        .lines()
        .map(str::trim)
        .filter(|l| is_release_name(l))
        .collect();
    releases.sort_unstable();
    releases.dedup();

    let excess = releases.len().saturating_sub(keep);
    releases[..excess].iter().map(|r| (*r).to_string()).collect()
}

/// `YYYYmmddHHMMSS`, as produced for `release_name`.
fn is_release_name(name: &str) -> bool {
    name.len() == RELEASE_NAME_LEN && name.bytes().all(|b| b.is_ascii_digit())
}

fn control(ctx: &mut TaskContext<'_>, flag: &str) -> DeployResult<()> {
    let service = ctx.fetch("service_link")?;
    ctx.run(&format!("svc {flag} {service}"))?;
    Ok(())
}

fn symlink_shared(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let shared = ctx.fetch("shared_path")?;
    let release = ctx.fetch("release_path")?;

    for file in ctx.config.list("linked_files")? {
        ctx.run(&format!("ln -nfs {shared}/{file} {release}/{file}"))?;
    }

    if proxy::kind(ctx.config)? == proxy::ProxyKind::Htaccess {
        ctx.run(&format!(
            "ln -nfs {shared}/config/.htaccess {release}/public/.htaccess"
        ))?;
    }
    Ok(())
}

fn symlink_public(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let release = ctx.fetch("release_path")?;
    let public = ctx.fetch("public_path")?;

    ctx.run(&format!("ln -nfs {release}/public {public}"))?;
    ctx.run(&world_readable(&format!("{release}/public"), "d", "755"))?;
    ctx.run(&world_readable(&format!("{release}/public"), "f", "644"))?;
    Ok(())
}

fn fix_permissions(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let deploy_to = ctx.fetch("deploy_to")?;
    let release = ctx.fetch("release_path")?;
    let shared = ctx.fetch("shared_path")?;
    let releases = ctx.fetch("releases_path")?;

    ctx.run(&format!(
        "chmod 755 {deploy_to} {release} {shared} {shared}/config {releases}"
    ))?;
    Ok(())
}

fn precompile(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let shared = ctx.fetch("shared_path")?;
    let release = ctx.fetch("release_path")?;
    let env = ctx.fetch("rails_env")?;

    ctx.run(&format!("ln -nfs {shared}/assets {release}/public/assets"))?;
    let command = runtime::in_runtime(
        ctx.config,
        &format!("cd {release} && RAILS_ENV={env} bundle exec rake assets:precompile"),
    )?;
    ctx.run(&command)?;
    Ok(())
}

fn fix_asset_permissions(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let assets = format!("{}/assets", ctx.fetch("shared_path")?);

    ctx.run(&world_readable(&assets, "d", "755"))?;
    ctx.run(&world_readable(&assets, "f", "644"))?;
    Ok(())
}

/// `chmod` every entry of one `find -type` under `root`.
fn world_readable(root: &str, kind: &str, mode: &str) -> String {
    format!("find {root} -type {kind} -print0 | xargs -0 -r chmod {mode}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_keeps_newest() {
        let listing = "20240103000000\n20240101000000\n20240104000000\n20240102000000\n";

        assert_eq!(
            releases_to_prune(listing, 2),
            vec!["20240101000000", "20240102000000"]
        );
    }

    #[test]
    fn prune_nothing_when_under_limit() {
        assert!(releases_to_prune("20240101000000\n", 3).is_empty());
        assert!(releases_to_prune("", 3).is_empty());
    }

    #[test]
    fn prune_ignores_blank_lines() {
        assert_eq!(
            releases_to_prune("\n 20240101000000 \n\n20240102000000\n20240103000000\n", 1),
            vec!["20240101000000", "20240102000000"]
        );
    }

    #[test]
    fn prune_skips_stderr_noise() {
        let listing = "20240101000000\n20240102000000\n20240103000000\n\
                       20240104000000\n20240105000000\n\
                       Shared connection to example.org closed.\n\
                       -rf /\nRVM is not a function\n";

        assert_eq!(
            releases_to_prune(listing, 3),
            vec!["20240101000000", "20240102000000"]
        );
    }

    #[test]
    fn release_names_are_timestamps() {
        assert!(is_release_name("20240101000000"));
        assert!(!is_release_name("2024010100000"));
        assert!(!is_release_name("2024010100000x"));
        assert!(!is_release_name("current"));
    }

    #[test]
    fn world_readable_command() {
        assert_eq!(
            world_readable("/srv/shared/assets", "f", "644"),
            "find /srv/shared/assets -type f -print0 | xargs -0 -r chmod 644"
        );
    }
}
