//! agentmeshd - AgentMesh trace daemon and agent discovery.

use agentmesh::cli::{Cli, Commands};
use agentmesh::commands::{self, CommandResult, DiscoverOptions};
use agentmesh::config::{self, ServeOverrides};
use agentmesh::daemon::{self, DaemonOptions};
use agentmesh::{Error, logging};
use clap::Parser;
use std::future::Future;
use std::path::Path;
use std::process;
use std::time::Duration;
use tracing::debug;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;
    logging::init(cli.json_logs);

    if let Err(e) = run_command(cli.command, cli.data_dir.as_deref(), human) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(e.exit_code());
    }
}

fn run_command(command: Commands, data_dir: Option<&Path>, human: bool) -> Result<(), Error> {
    let data_dir = config::resolve_data_dir(data_dir)?;
    debug!(data_dir = %data_dir.value.display(), source = %data_dir.source, "resolved data directory");
    let data_dir = data_dir.value;

    match command {
        Commands::Start {
            host,
            port,
            background,
        } => {
            let overrides = ServeOverrides {
                host,
                port,
                bootstrap: None,
            };
            let serve = config::resolve_serve(&data_dir, &overrides)?;
            let opts = DaemonOptions::new(&data_dir)
                .with_host(serve.host())
                .with_port(serve.port());

            if background {
                output(&commands::start_background(&opts)?, human);
            } else {
                if human {
                    println!("Starting agentmeshd on {}:{}", opts.host, opts.port);
                }
                daemon::start_foreground(&opts)?;
            }
        }
        Commands::Stop => {
            let result = commands::stop(&data_dir);
            output(&result, human);
            if !result.stopped {
                process::exit(1);
            }
        }
        Commands::Status => {
            output(&commands::status(&data_dir), human);
        }
        Commands::RebuildIndex => {
            output(&commands::rebuild_index(&data_dir)?, human);
        }
        Commands::Trace { id, daemon_url } => {
            let url = config::resolve_daemon_url(daemon_url.as_deref());
            debug!(url = %url.value, source = %url.source, "resolved daemon url");
            let result = block_on(commands::trace(&url.value, &id))??;
            output(&result, human);
        }
        Commands::Discover {
            bootstrap,
            timeout,
            no_mdns,
        } => {
            if !timeout.is_finite() || timeout < 0.0 {
                return Err(Error::InvalidInput(format!("invalid timeout: {}", timeout)));
            }
            let overrides = ServeOverrides {
                host: None,
                port: None,
                bootstrap,
            };
            let serve = config::resolve_serve(&data_dir, &overrides)?;
            let opts = DiscoverOptions {
                bootstrap: serve.bootstrap().map(Path::to_path_buf),
                timeout: Duration::from_secs_f64(timeout),
                mdns: !no_mdns,
            };
            let result = block_on(commands::discover(&opts))??;
            output(&result, human);
        }
        Commands::Announce { name, port, url } => {
            let (announcer, result) = commands::announce(&name, port, &url)?;
            output(&result, human);
            block_on(daemon::shutdown_signal())?;
            drop(announcer);
        }
    }

    Ok(())
}

/// Run a future to completion on a fresh runtime.
fn block_on<F: Future>(future: F) -> Result<F::Output, Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

fn output<T: CommandResult>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
