use clap::Parser;
use upsguard_cli::notify::{self, NotifyArgs};
use upsguard_core::logging;

fn main() {
    let args = NotifyArgs::parse();
    logging::init(&args.log_file());

    match notify::run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
