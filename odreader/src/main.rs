mod commands;
mod handlers;
mod output;

use clap::Parser;
use commands::Cli;

fn main() {
    let cli = Cli::parse();
    output::init_logger(cli.verbose);
    if let Err(err) = handlers::run(cli) {
        output::print_error(&err.to_string());
        std::process::exit(1);
    }
}
