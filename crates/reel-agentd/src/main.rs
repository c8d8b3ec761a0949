use clap::Parser;

mod app;
mod args;
mod metrics;

use args::Args;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Local offset must be resolved before the runtime starts threads.
    reel_observe::init_local_offset();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(app::run(args))
}
