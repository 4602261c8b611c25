use std::str::FromStr;

use caddyfile_rs::{Caddyfile, Directive, SiteBlock, format};

use crate::config::ConfigStore;
use crate::error::{DeployError, DeployResult};
use crate::task::{TaskContext, TaskGraph};
use crate::template::ScriptTemplate;

/// Apache rewrite rules sending every non-file request to the
/// application server.
pub const HTACCESS: &str = "\
RewriteEngine On
RewriteBase /
RewriteCond %{REQUEST_FILENAME} !-f
RewriteRule (.*) http://localhost:{{thin_port}}/$1 [P]
";

const READABLE: u32 = 0o644;

/// Which front-end server the proxy rules are written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Htaccess,
    Caddy,
}

impl ProxyKind {
    /// File name under `<shared_path>/config`.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Htaccess => ".htaccess",
            Self::Caddy => "Caddyfile",
        }
    }
}

impl FromStr for ProxyKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "htaccess" | "apache" => Ok(Self::Htaccess),
            "caddy" => Ok(Self::Caddy),
            other => Err(DeployError::InvalidSetting {
                key: "proxy".into(),
                reason: format!("unknown proxy '{other}', expected htaccess or caddy"),
            }),
        }
    }
}

/// The configured proxy kind.
pub fn kind(config: &ConfigStore) -> DeployResult<ProxyKind> {
    config.string("proxy")?.parse()
}

/// Register `proxy:*` tasks.
pub fn register(graph: &mut TaskGraph) {
    graph.namespace("proxy", |ns| {
        ns.task(
            "setup",
            "Write reverse proxy rules to the shared config",
            setup_reverse_proxy,
        );
    });
}

pub fn render_htaccess(config: &ConfigStore) -> DeployResult<String> {
    ScriptTemplate::new(HTACCESS).render_config(config)
}

/// Caddy site serving static files from the current release and
/// proxying everything else to the application server.
pub fn render_caddyfile(config: &ConfigStore) -> DeployResult<String> {
    let address = config
        .optional_string("domain")?
        .unwrap_or_else(|| ":80".to_string());
    let current = config.string("current_path")?;
    let port = config.integer("thin_port")?;

    let site = SiteBlock::new(&address)
        .directive(Directive::new(&format!("root * {current}/public")))
        .directive(Directive::new("@dynamic not file"))
        .directive(Directive::new(&format!(
            "reverse_proxy @dynamic localhost:{port}"
        )))
        .directive(Directive::new("file_server"));

    Ok(format(&Caddyfile::new().site(site)))
}

/// Proxy rules for the configured kind.
pub fn render(config: &ConfigStore) -> DeployResult<String> {
    match kind(config)? {
        ProxyKind::Htaccess => render_htaccess(config),
        ProxyKind::Caddy => render_caddyfile(config),
    }
}

fn setup_reverse_proxy(ctx: &mut TaskContext<'_>) -> DeployResult<()> {
    let shared = ctx.fetch("shared_path")?;
    let target = format!("{shared}/config/{}", kind(ctx.config)?.file_name());
    let rules = render(ctx.config)?;

    ctx.run(&format!("mkdir -p {shared}/config"))?;
    ctx.put(&rules, &target, READABLE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(proxy: &str) -> ConfigStore {
        let mut config = ConfigStore::new();
        config
            .set("proxy", proxy)
            .set("thin_port", 45000)
            .set("current_path", "/srv/demo/current");
        config
    }

    #[test]
    fn htaccess_proxies_to_port() {
        let rules = render(&config("htaccess")).unwrap();

        assert!(rules.contains("RewriteCond %{REQUEST_FILENAME} !-f"));
        assert!(rules.contains("RewriteRule (.*) http://localhost:45000/$1 [P]"));
    }

    #[test]
    fn caddyfile_without_domain_listens_on_port_80() {
        let rules = render(&config("caddy")).unwrap();

        assert!(rules.contains(":80 {"));
        assert!(rules.contains("root * /srv/demo/current/public"));
        assert!(rules.contains("@dynamic not file"));
        assert!(rules.contains("reverse_proxy @dynamic localhost:45000"));
        assert!(rules.contains("file_server"));
    }

    #[test]
    fn caddyfile_uses_domain() {
        let mut config = config("caddy");
        config.set("domain", "demo.example.com");

        let rules = render(&config).unwrap();

        assert!(rules.contains("demo.example.com {"));
    }

    #[test]
    fn unknown_proxy_kind() {
        assert!(matches!(
            render(&config("nginx")),
            Err(DeployError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn file_names() {
        assert_eq!(ProxyKind::Htaccess.file_name(), ".htaccess");
        assert_eq!(ProxyKind::Caddy.file_name(), "Caddyfile");
    }
}
