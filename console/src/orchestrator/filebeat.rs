//! Log shipping agent (filebeat) packaging and per-host configuration

use std::collections::BTreeMap;

use crate::models::server::{Components, OsFamily};
use crate::orchestrator::templates::render;

pub const FILEBEAT_BINARY: &str = "/usr/bin/filebeat";
pub const FILEBEAT_CONFIG_PATH: &str = "/etc/filebeat/filebeat.yml";
pub const LOG_AGENT_PATH: &str = "/usr/local/bin/getfilebeatlog.py";

const ELASTIC_YUM_REPO: &str = "[elastic-6.x]
name=Elastic repository for 6.x packages
baseurl=https://artifacts.elastic.co/packages/6.x/yum
gpgcheck=1
gpgkey=https://artifacts.elastic.co/GPG-KEY-elasticsearch
enabled=1
autorefresh=1
type=rpm-md
";

/// Commands registering the elastic package repository
pub fn repository_commands(os: OsFamily) -> Vec<String> {
    match os {
        OsFamily::Debian => vec![
            "wget -qO - https://artifacts.elastic.co/GPG-KEY-elasticsearch \
             | APT_KEY_DONT_WARN_ON_DANGEROUS_USAGE=DontWarn apt-key add -"
                .to_string(),
            "echo 'deb https://artifacts.elastic.co/packages/6.x/apt stable main' \
             > /etc/apt/sources.list.d/elastic-6.x.list"
                .to_string(),
        ],
        OsFamily::RedHat => vec![
            "rpm --import https://packages.elastic.co/GPG-KEY-elasticsearch".to_string(),
            format!("echo '{}' > /etc/yum.repos.d/elastic.repo", ELASTIC_YUM_REPO),
        ],
    }
}

/// Packages installed for the agent, in order
pub fn agent_packages(os: OsFamily) -> &'static [&'static str] {
    match os {
        OsFamily::Debian => &["apt-transport-https", "filebeat"],
        OsFamily::RedHat => &["filebeat"],
    }
}

/// Boot registration of the agent service
pub fn boot_command(os: OsFamily) -> &'static str {
    match os {
        OsFamily::Debian => "update-rc.d filebeat defaults 95 10",
        OsFamily::RedHat => "chkconfig --add filebeat",
    }
}

/// Per-host values substituted into the agent config
#[derive(Debug, Clone)]
pub struct FilebeatHost<'a> {
    pub ip: &'a str,
    pub os_name: &'a str,
    pub os: OsFamily,
    pub gluu_version: &'a str,
    /// Container root when the platform runs isolated, `None` otherwise
    pub chroot_path: Option<&'a str>,
    pub components: &'a Components,
}

fn path_list(paths: &[String]) -> String {
    paths
        .iter()
        .map(|p| format!("    - {}\n", p))
        .collect::<String>()
}

fn component_input(host: &FilebeatHost<'_>, kind: &str, paths: &[String]) -> String {
    format!(
        "- type: log\n  paths:\n{}  multiline.pattern: '^[0-9]{{4}}-[0-9]{{2}}-[0-9]{{2}}'\n  \
         multiline.negate: true\n  multiline.match: after\n  fields:\n    gluu:\n      \
         version: {}\n      chroot: {}\n    ip: {}\n    os: {}\n    type: {}\n",
        path_list(paths),
        host.gluu_version,
        host.chroot_path.is_some(),
        host.ip,
        host.os_name,
        kind
    )
}

/// Render the agent config for one host.
///
/// `output` is the file the agent writes to; its directory and file name
/// become the file output of the config.
pub fn render_filebeat_config(template: &str, host: &FilebeatHost<'_>, output: &str) -> String {
    let root = host.chroot_path.unwrap_or("");
    let apache: Vec<String> = match host.os {
        OsFamily::RedHat => vec![
            format!("{}/var/log/httpd/access_log", root),
            format!("{}/var/log/httpd/error_log", root),
        ],
        OsFamily::Debian => vec![
            format!("{}/var/log/apache2/access.log", root),
            format!("{}/var/log/apache2/error.log", root),
            format!("{}/var/log/apache2/other_vhosts_access.log", root),
        ],
    };

    let passport = if host.components.passport {
        component_input(
            host,
            "passport",
            &[format!("{}/opt/gluu/node/passport/server/logs/passport.log", root)],
        )
    } else {
        String::new()
    };

    let shibboleth = if host.components.shibboleth {
        let paths: Vec<String> = ["idp-process.log", "idp-warn.log", "idp-audit.log"]
            .iter()
            .map(|f| format!("{}/opt/shibboleth-idp/logs/{}", root, f))
            .collect();
        component_input(host, "shibboleth", &paths)
    } else {
        String::new()
    };

    let (output_dir, output_name) = match output.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", output),
    };

    let mut vars = BTreeMap::new();
    vars.insert("apache_paths", path_list(&apache).trim_end().to_string());
    vars.insert("gluu_version", host.gluu_version.to_string());
    vars.insert("chroot", host.chroot_path.is_some().to_string());
    vars.insert("chroot_path", root.to_string());
    vars.insert("ip", host.ip.to_string());
    vars.insert("os", host.os_name.to_string());
    vars.insert("input_passport", passport);
    vars.insert("input_shibboleth", shibboleth);
    vars.insert("output_dir", output_dir.to_string());
    vars.insert("output_name", output_name.to_string());
    render(template, &vars)
}
