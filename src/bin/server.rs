use std::process::ExitCode;

use clap::Parser;
use oxidis::config::Config;
use oxidis::server::Server;

#[derive(Parser, Debug)]
#[command(name = "oxidis-server", about = "An in-memory RESP key/value server")]
struct Args {
    /// Path to a JSON configuration file
    config: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("config error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("init server error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run() {
        eprintln!("server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
