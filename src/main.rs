use clap::Parser;
use scatter_web::{limits::Limits, Server};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Edge-triggered, thread-pooled HTTP/1.1 static file server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TCP port to listen on.
    port: u16,

    /// Directory that URL paths resolve under.
    #[arg(long, default_value = "./resources")]
    doc_root: PathBuf,

    /// Worker threads draining the request queue.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Upper bound on queued, unprocessed requests.
    #[arg(long, default_value_t = 10000)]
    queue_size: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let limits = Limits {
        doc_root: cli.doc_root,
        worker_threads: cli.threads,
        max_queued_requests: cli.queue_size,
        ..Limits::default()
    };

    let result = Server::builder()
        .port(cli.port)
        .limits(limits)
        .build()
        .and_then(|mut server| server.run());

    if let Err(err) = result {
        error!(%err, "server failed");
        std::process::exit(-1);
    }
}
