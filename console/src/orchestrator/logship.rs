//! Log shipping rollout and teardown across every managed server

use crate::errors::ConsoleError;
use crate::jobs::log::{HostLog, ProgressSink};
use crate::models::fleet::FleetSettings;
use crate::models::server::{OsFamily, Server};
use crate::orchestrator::context::{session_or_log, Orchestrator};
use crate::orchestrator::filebeat::{
    agent_packages, boot_command, render_filebeat_config, repository_commands, FilebeatHost,
    FILEBEAT_BINARY, FILEBEAT_CONFIG_PATH, LOG_AGENT_PATH,
};
use crate::orchestrator::templates::{FILEBEAT_CONFIG, LOG_AGENT};
use crate::remote::session::HostSession;
use crate::storage::settings::OfflineMissingAgent;
use crate::utils::shell_quote;

/// Outcome of configuring one host
enum HostOutcome {
    Configured,
    Skipped,
    AbortRun,
}

fn family_name(os: OsFamily) -> &'static str {
    match os {
        OsFamily::Debian => "Debian",
        OsFamily::RedHat => "RedHat",
    }
}

impl Orchestrator {
    /// Install and configure the shipping agent on every server.
    ///
    /// `true` only when every server ended up configured.
    pub async fn setup_log_shipping(
        &self,
        force_reinstall: bool,
        sink: &dyn ProgressSink,
    ) -> Result<bool, ConsoleError> {
        let records = self.store.read().await?;
        let mut servers = records.servers.clone();
        servers.sort_by_key(|s| s.id);

        let mut all_configured = true;
        for server in &servers {
            let log = HostLog::new(sink, server.id);
            let Some(session) = session_or_log(&log, self.open_server(server).await) else {
                all_configured = false;
                continue;
            };

            let outcome = self
                .ship_host_logs(&session, server, &records.settings, force_reinstall, &log)
                .await;
            session.close().await?;

            match outcome? {
                HostOutcome::Configured => {}
                HostOutcome::Skipped => all_configured = false,
                HostOutcome::AbortRun => return Ok(false),
            }
        }
        Ok(all_configured)
    }

    async fn ship_host_logs(
        &self,
        session: &HostSession,
        server: &Server,
        settings: &FleetSettings,
        force_reinstall: bool,
        log: &HostLog<'_>,
    ) -> Result<HostOutcome, ConsoleError> {
        let os = session.os();

        log.info("Uploading log collection agent");
        let agent = self.templates.load(LOG_AGENT).await?;
        session.put_file(LOG_AGENT_PATH, &agent).await?;
        session.run(&format!("chmod +x {}", LOG_AGENT_PATH)).await?;

        let installed = session.exists(FILEBEAT_BINARY).await?;
        if settings.offline {
            if !installed {
                log.error("Filebeat was not installed on this server. Please install and retry");
                return Ok(match self.options.offline_missing_agent {
                    OfflineMissingAgent::AbortRun => HostOutcome::AbortRun,
                    OfflineMissingAgent::SkipHost => HostOutcome::Skipped,
                });
            }
        } else if !installed || force_reinstall {
            log.info("Installing Filebeat");
            for command in repository_commands(os) {
                session.run(&command).await?;
            }
            for package in agent_packages(os) {
                session.install_package(package).await?;
            }
            session.run(boot_command(os)).await?;

            if !session.exists(FILEBEAT_BINARY).await? {
                log.error("Filebeat installation failed");
                return Ok(HostOutcome::Skipped);
            }
        } else {
            log.debug("Filebeat already installed");
        }

        let container = settings.container_path();
        let chroot = session.exists(&container).await?;
        let os_name = server.os.clone().unwrap_or_else(|| family_name(os).to_string());
        let host = FilebeatHost {
            ip: &server.ip,
            os_name: &os_name,
            os,
            gluu_version: &settings.gluu_version,
            chroot_path: chroot.then_some(container.as_str()),
            components: &server.components,
        };

        log.info("Writing Filebeat configuration");
        let template = self.templates.load(FILEBEAT_CONFIG).await?;
        let config = render_filebeat_config(&template, &host, &self.options.remote_log_path);
        session.put_file(FILEBEAT_CONFIG_PATH, &config).await?;

        // output varies across init systems
        let started = if installed {
            session.restart_service("filebeat").await?
        } else {
            session.start_service("filebeat").await?
        };
        if !started.success() {
            log.debug(format!("filebeat start: {}", started.stderr.trim()));
        }

        self.store
            .edit_server(server.id, Box::new(|s| s.filebeat = true))
            .await?;
        log.success("Log shipping configured");
        Ok(HostOutcome::Configured)
    }

    /// Uninstall the shipping agent from every server
    pub async fn remove_log_shipping(&self, sink: &dyn ProgressSink) -> Result<bool, ConsoleError> {
        let mut servers = self.store.servers().await?;
        servers.sort_by_key(|s| s.id);

        let mut all_removed = true;
        for server in &servers {
            let log = HostLog::new(sink, server.id);
            let Some(session) = session_or_log(&log, self.open_server(server).await) else {
                all_removed = false;
                continue;
            };

            log.info("Removing Filebeat");
            let output = session.remove_package("filebeat").await?;
            if !output.success() {
                log.warning(format!("Removing filebeat: {}", output.stderr.trim()));
            }
            session
                .run(&format!("rm -f {}*", shell_quote(&self.options.remote_log_path)))
                .await?;
            session.close().await?;

            self.store
                .edit_server(server.id, Box::new(|s| s.filebeat = false))
                .await?;
        }
        Ok(all_removed)
    }
}
