mod broker;
mod cli;
mod client;
mod ipc;

use std::path::{Path, PathBuf};

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

use broker::state::SwitchConfig;

// main stays synchronous: for `broker --daemon` the socket must be
// bound and the process forked before any tokio runtime exists, so
// the runtime is built explicitly per command.
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);

    match cli.command {
        Command::Broker {
            ip,
            daemon,
            pidfile,
            www,
        } => run_broker(&ip, cli.port, daemon, pidfile, www),
        Command::Client(action) => run_client(cli.port, action),
    }
}

fn init_tracing(verbose: bool, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_broker(ip: &str, port: u16, daemon: bool, pidfile: Option<PathBuf>, www: PathBuf) {
    let addr = format!("{ip}:{port}");

    // Bind before daemonizing so concurrent clients never observe
    // connection-refused between fork and listen.
    let listener = match std::net::TcpListener::bind(&addr) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("switchd broker: bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = listener.set_nonblocking(true) {
        eprintln!("switchd broker: {e}");
        std::process::exit(1);
    }

    if daemon {
        // Keep the working directory (the asset root may be relative);
        // detach stdio.
        if let Err(e) = nix::unistd::daemon(true, false) {
            eprintln!("switchd broker: daemonize: {e}");
            std::process::exit(1);
        }
    }

    // Written after the fork so the file carries the daemon's pid.
    if let Some(path) = &pidfile {
        if let Err(e) = std::fs::write(path, format!("{}\n", std::process::id())) {
            tracing::error!(path = %path.display(), error = %e, "failed to write pidfile");
            std::process::exit(1);
        }
    }

    let config = SwitchConfig {
        www_root: www,
        ..SwitchConfig::default()
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("switchd broker: runtime: {e}");
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(async {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        broker::run(listener, config).await
    });

    if let Some(path) = &pidfile {
        remove_pidfile(path);
    }

    if let Err(e) = result {
        tracing::error!(error = %e, "broker failed");
        eprintln!("switchd broker: {e}");
        std::process::exit(1);
    }
}

fn remove_pidfile(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove pidfile");
    }
}

fn run_client(port: u16, action: cli::ClientCommand) {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("switchd: runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(client::run(port, action)) {
        tracing::error!(error = %e, "client failed");
        eprintln!("switchd: {e}");
        std::process::exit(1);
    }
}
