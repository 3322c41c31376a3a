//! CLI entry point for the confvault poller.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use confvault_core::{SnmpOverrides, SnmpVersion, ARGUMENT_ERROR, NONFATAL_ERROR};
use confvault_store::VersionedStore;

use confvault_poll::config::SyncConfig;
use confvault_poll::dns::DigZoneEnumerator;
use confvault_poll::engine::{EngineSettings, ImportKind, ImportSummary, SyncEngine};
use confvault_poll::error::SyncError;
use confvault_poll::CommandTransport;

#[derive(Parser)]
#[command(name = "confvault")]
#[command(about = "Poll network devices and version their configurations")]
struct Cli {
    /// Root directory of the versioned configuration store.
    #[arg(short, long)]
    repository: Option<PathBuf>,

    /// Hostname pattern; capture groups become leading directories.
    #[arg(short = 'x', long)]
    regex: Option<String>,

    /// Host string `[user[:pass]@]hostname` or `file:<path>`. Repeatable.
    #[arg(short = 'H', long)]
    hostname: Vec<String>,

    /// Text or CSV file of host strings.
    #[arg(long)]
    hostname_file: Vec<PathBuf>,

    /// Domain to expand by zone transfer. Repeatable.
    #[arg(short, long)]
    domain: Vec<String>,

    /// Text or CSV file of domains.
    #[arg(long)]
    domain_file: Vec<PathBuf>,

    /// File of hostnames never polled.
    #[arg(short, long)]
    blacklist: Option<PathBuf>,

    /// Default device username.
    #[arg(short, long)]
    username: Option<String>,

    /// Default device password.
    #[arg(short, long)]
    password: Option<String>,

    #[arg(long)]
    snmp_community: Option<String>,

    #[arg(long)]
    snmp_port: Option<u16>,

    /// SNMP version: 1 or 2c.
    #[arg(long)]
    snmp_version: Option<SnmpVersion>,

    /// Per-request SNMP timeout in seconds.
    #[arg(long)]
    snmp_timeout: Option<u64>,

    #[arg(long)]
    snmp_retries: Option<u32>,

    /// Commit message (default: "Processed N host(s)").
    #[arg(short, long)]
    message: Option<String>,

    /// Hosts polled concurrently.
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Config file prefix (default: confvault).
    #[arg(short, long, default_value = "confvault")]
    config: String,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    report_json: bool,

    /// Exit non-zero when any host failed.
    #[arg(long)]
    strict: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(ARGUMENT_ERROR as u8)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Aborted");
            ExitCode::from(ARGUMENT_ERROR as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = resolve_config(&cli)?;
    let repository = config
        .repository
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Repository required: set --repository or sync.repository"))?;

    if config.hosts.is_empty()
        && config.domains.is_empty()
        && cli.hostname_file.is_empty()
        && cli.domain_file.is_empty()
    {
        anyhow::bail!("No hosts: use --hostname, --hostname-file, --domain, or --domain-file");
    }

    let mut store = VersionedStore::new(repository, config.vcs.backend(&config.tools.git))?;
    store.prepare(&config.identity())?;

    let transport = Arc::new(CommandTransport::new(config.tools.clone()));
    let zones = Arc::new(DigZoneEnumerator::new(
        &config.tools.dig,
        config.nameserver.clone(),
        Duration::from_secs(config.zone_timeout_secs),
    ));
    let mut engine = SyncEngine::new(EngineSettings::from_config(&config)?, store, transport, zones);

    if let Some(file) = &config.blacklist_file {
        let summary = engine.import_blacklist(file)?;
        log_parse_errors(&summary);
    }

    let overrides = SnmpOverrides::default();
    for host in &config.hosts {
        let summary = engine.add_host_string(host, &overrides)?;
        log_parse_errors(&summary);
    }
    for domain in &config.domains {
        match engine.add_domain_string(domain, &overrides).await {
            Ok(summary) => log_parse_errors(&summary),
            Err(SyncError::Zone(e)) => tracing::warn!(domain = %domain, error = %e, "Skipping domain"),
            Err(e) => return Err(e.into()),
        }
    }
    let files = cli
        .hostname_file
        .iter()
        .map(|p| (p, ImportKind::Host))
        .chain(cli.domain_file.iter().map(|p| (p, ImportKind::Domain)));
    for (path, kind) in files {
        let summary = engine.import_file(path, kind, &overrides).await?;
        log_parse_errors(&summary);
    }

    let report = engine.run(config_message(&cli)).await?;

    if cli.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if cli.strict && report.failed() > 0 {
        return Ok(ExitCode::from(NONFATAL_ERROR as u8));
    }
    Ok(ExitCode::SUCCESS)
}

fn config_message(cli: &Cli) -> Option<&str> {
    cli.message.as_deref().filter(|m| !m.trim().is_empty())
}

/// Layer CLI flags over the file/env configuration.
fn resolve_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = SyncConfig::load(&cli.config)?;

    if let Some(repository) = &cli.repository {
        config.repository = Some(repository.clone());
    }
    if let Some(regex) = &cli.regex {
        config.regex = regex.clone();
    }
    if cli.username.is_some() {
        config.username = cli.username.clone();
    }
    if cli.password.is_some() {
        config.password = cli.password.clone();
    }
    if let Some(blacklist) = &cli.blacklist {
        config.blacklist_file = Some(blacklist.clone());
    }
    if let Some(max) = cli.max_concurrent {
        config.max_concurrent_polls = max;
    }

    config.snmp = config.snmp.merged(&SnmpOverrides {
        port: cli.snmp_port,
        community: cli.snmp_community.clone(),
        version: cli.snmp_version,
        timeout_secs: cli.snmp_timeout,
        retries: cli.snmp_retries,
    });

    config.hosts.extend(cli.hostname.iter().cloned());
    config.domains.extend(cli.domain.iter().cloned());

    config.validate()?;
    Ok(config)
}

fn log_parse_errors(summary: &ImportSummary) {
    for error in &summary.errors {
        tracing::warn!(error = %error, "Skipping malformed entry");
    }
}
