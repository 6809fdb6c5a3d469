//! Composition root: wires every collaborator from a `SecurityConfig` and
//! drives one manifest-fetch-and-install run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use modvault::{
    AtomicInstaller, CertificatePinner, ChannelAuditSink, DownloadCoordinator, Environment,
    FilesystemIntegrityValidator, ManifestValidator, QuarantineManager, ReqwestTransport, RsaPkcs1Sha256Verifier,
    SafeExtractor, SecurityConfig, StdFs, SysinfoDiskSpaceChecker, SystemClock, TracingAuditSink,
};
use modvault::extractor::ExtractionLimits;
use modvault::orchestrator::InstallOrchestrator;

/// Fetch a signed module manifest and install every module it lists.
#[derive(Debug, Parser)]
struct Cli {
    /// URL of the signed manifest to fetch.
    manifest_url: String,

    /// PEM-encoded RSA public key used to verify the manifest signature.
    #[arg(long)]
    public_key: PathBuf,

    /// Root directory modules get installed under (Modules/ModuleBackups/Quarantine live here).
    #[arg(long, default_value = "./modvault-root")]
    install_root: PathBuf,

    /// Environment this client is running in (development/staging/production).
    #[arg(long, default_value = "production")]
    environment: String,

    /// Path to a TOML file overriding the default security configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_environment(s: &str) -> Environment {
    match s.to_ascii_lowercase().as_str() {
        "development" | "dev" => Environment::Development,
        "staging" => Environment::Staging,
        _ => Environment::Production,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SecurityConfig::from_toml(&std::fs::read_to_string(path)?)?,
        None => SecurityConfig::default(),
    };
    config.apply_env_overrides();

    let public_key_pem = std::fs::read_to_string(&cli.public_key)?;
    let verifier = Arc::new(RsaPkcs1Sha256Verifier::from_pem(&public_key_pem)?);

    let audit: Arc<dyn modvault::AuditSink> = Arc::new(ChannelAuditSink::new(Arc::new(TracingAuditSink)));
    let clock = Arc::new(SystemClock);
    let fs = Arc::new(StdFs);

    let manifest_validator = ManifestValidator::new(
        verifier,
        audit.clone(),
        chrono::Duration::seconds(config.max_manifest_age_secs),
        config.enforce_environment_match,
    );

    let coordinator: Arc<dyn modvault::Coordinator> = Arc::new(DownloadCoordinator::new(
        clock.clone(),
        audit.clone(),
        config.max_concurrent_downloads,
        chrono::Duration::seconds(config.download_cooldown_secs),
        config.max_downloads_per_hour,
        config.max_history,
    ));

    let limits = ExtractionLimits {
        max_download_size: config.max_download_size,
        max_uncompressed_size: config.max_uncompressed_size,
        max_individual_file_size: config.max_individual_file_size,
        max_file_count: config.max_file_count,
        allowed_extensions: config.allowed_extensions.clone(),
        forbidden_patterns: config.forbidden_patterns.clone(),
    };
    let extractor: Arc<dyn modvault::Extractor> = Arc::new(SafeExtractor::new(limits, audit.clone()));
    let installer: Arc<dyn modvault::Installer> = Arc::new(AtomicInstaller::new(cli.install_root.clone(), fs.clone()));
    let integrity: Arc<dyn modvault::Integrity> = Arc::new(FilesystemIntegrityValidator::new(audit.clone()));
    let quarantine: Arc<dyn modvault::Quarantine> =
        Arc::new(QuarantineManager::new(cli.install_root.clone(), clock.clone(), audit.clone(), fs.clone()));
    let disk_space: Arc<dyn modvault::DiskSpaceChecker> = Arc::new(SysinfoDiskSpaceChecker);
    let transport: Arc<dyn modvault::Transport> =
        Arc::new(ReqwestTransport::new(Duration::from_secs(config.download_timeout_secs))?);
    let pinner = Arc::new(CertificatePinner::new(
        config.pinned_spki_sha256_base64.clone(),
        config.allow_insecure_localhost,
    ));

    let orchestrator = InstallOrchestrator::new(
        transport,
        coordinator,
        extractor,
        installer,
        integrity,
        quarantine,
        audit,
        clock,
        fs,
        disk_space,
        manifest_validator,
        pinner,
        config.checksum_algorithm,
        config.max_download_size,
    );

    let environment = parse_environment(&cli.environment);
    let results = orchestrator.run(&cli.manifest_url, environment).await?;

    let mut failures = 0;
    for (module_id, result) in results {
        match result {
            Ok(path) => println!("installed {module_id} -> {}", path.display()),
            Err(e) => {
                failures += 1;
                eprintln!("failed to install {module_id}: {e}");
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
