use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info};

use repopress::job::Job;
use repopress::{
    collect_packages, open_bucket, BucketOptions, RebuildJob, RepositoryConfig, SigningOptions,
};

#[derive(Parser)]
struct Args {
    #[clap(long, default_value = "repopress.json")]
    /// Path to the repository configuration file.
    config: PathBuf,

    #[clap(long)]
    /// Name of the distribution to rebuild, e.g. "ubuntu2004".
    distro: String,

    #[clap(long)]
    /// Edition of the distribution, e.g. "org" or "enterprise".
    edition: String,

    #[clap(long)]
    /// Version of the packages being published, e.g. "4.2.1".
    version: String,

    #[clap(long)]
    /// Architecture the packages were built for, e.g. "x86_64".
    arch: String,

    #[clap(long)]
    /// Directory holding the candidate package files.
    packages: PathBuf,

    #[clap(long, env = "AWS_PROFILE")]
    /// Credential profile to use for the package bucket.
    profile: Option<String>,

    #[clap(long)]
    /// Log bucket transfers without performing them.
    dry_run: bool,

    #[clap(long)]
    /// Deadline in minutes for each remote repository.
    timeout: Option<u64>,

    #[clap(flatten)]
    logging: repopress::logging::LoggingArgs,
}

#[tokio::main]
async fn main() -> Result<(), i32> {
    let args = Args::parse();

    args.logging.init();

    let mut conf = RepositoryConfig::from_file(&args.config).map_err(|e| {
        error!("reading {}: {}", args.config.display(), e);
        1
    })?;
    if args.dry_run {
        conf.dry_run = true;
    }

    let distro = conf
        .definition(&args.distro, &args.edition)
        .cloned()
        .ok_or_else(|| {
            error!(
                "no definition for distro {:?} edition {:?} in {}",
                args.distro,
                args.edition,
                args.config.display()
            );
            1
        })?;

    let packages =
        collect_packages(&args.packages, distro.format.package_suffix()).map_err(|e| {
            error!("{}", e);
            1
        })?;
    info!(
        "rebuilding {} {} with {} candidate packages",
        distro.name,
        args.version,
        packages.len()
    );

    let storage = conf.storage_location.clone().ok_or_else(|| {
        error!(
            "no storage location configured in {}",
            args.config.display()
        );
        1
    })?;
    let bucket = open_bucket(
        &storage,
        BucketOptions {
            bucket: distro.bucket.clone(),
            region: distro.region.clone(),
            profile: args.profile.clone(),
            dry_run: conf.dry_run,
            verbose: conf.verbose,
            ..Default::default()
        },
    )
    .map_err(|e| {
        error!("{}", e);
        1
    })?;

    let signing = SigningOptions::from_env(conf.tools.notary_client_path(), conf.notary_url.clone());

    let job = RebuildJob::new(
        conf,
        Some(distro),
        &args.version,
        &args.arch,
        packages,
        signing,
        bucket,
    )
    .map_err(|e| {
        error!("{}", e);
        1
    })?;

    job.run(args.timeout.map(|minutes| Duration::from_secs(minutes * 60)))
        .await;

    for dir in job.working_dirs() {
        debug!("staging directory {} left for inspection", dir.display());
    }
    if job.has_errors() {
        return Err(1);
    }
    Ok(())
}
