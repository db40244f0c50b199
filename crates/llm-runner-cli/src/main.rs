mod cli;
mod logging;

use crate::logging::init_logger;

fn main() {
    init_logger().init();

    if let Err(e) = cli::cli_main() {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}
