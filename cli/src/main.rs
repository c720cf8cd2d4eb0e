//! apprt: command-line client for the application runtime daemon.

mod commands;
mod formatters;
mod options;

use options::CliOptions;

fn print_usage() {
    eprintln!(
        "apprt - manage a running application runtime

USAGE:
    apprt [OPTIONS] <COMMAND> [ARGS]

OPTIONS:
    --runtime <pid|name>   Select a runtime by daemon pid or entrypoint name
    --runtime-dir <path>   Directory scanned for daemon sockets
    --json                 Print raw JSON instead of tables
    -h, --help             Show this help

COMMANDS:
    ps                                    List workers and their states
    applications                          List applications in start order
    config                                Show the loaded configuration
    env <app>                             Show an application's environment
    metrics <app>                         Show latest health samples
    logs [app] [--level L]                Stream aggregated logs
    inject <app> [--method M] [--path P] [--body B]
                                          Send an HTTP request to an application
    start [app]                           Start one application or all
    stop [app]                            Stop one application or all
    restart [app]                         Restart one application or all
    reload [app]                          Reload as after a source change
    pprof <start|stop> <app>              Control a profiling session"
    );
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match CliOptions::parse(args) {
        Ok(Some(options)) => options,
        Ok(None) => {
            print_usage();
            std::process::exit(2);
        }
        Err(message) => {
            eprintln!("{message}");
            print_usage();
            std::process::exit(2);
        }
    };

    let code = commands::run(options).await;
    std::process::exit(code);
}
