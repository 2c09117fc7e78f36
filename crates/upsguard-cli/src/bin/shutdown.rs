use clap::Parser;
use upsguard_cli::shutdown::{self, ShutdownArgs};
use upsguard_core::logging;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = match ShutdownArgs::try_parse() {
        Ok(args) => args,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            logging::init(&shutdown::fallback_log_file());
            tracing::error!("cannot parse command line: {}", e.to_string().trim());
            std::process::exit(1);
        }
    };

    let resolved = args.resolve();
    let config = resolved.config;
    logging::init(&config.log_file);
    for issue in &resolved.issues {
        tracing::error!(error = %issue, "invalid setting ignored; using its default");
    }

    let report = shutdown::run(&config).await;
    if let Err(e) = shutdown::report(&report, args.json) {
        tracing::warn!(error = %e, "could not print run report");
    }

    match report.result() {
        Ok(()) => tracing::info!(stage = %report.stage, "shutdown procedure finished"),
        Err(e) => tracing::error!("shutdown procedure failed: {e}"),
    }
    std::process::exit(report.exit_code());
}
