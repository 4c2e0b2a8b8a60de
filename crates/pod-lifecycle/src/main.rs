use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use pod_lifecycle::app::Application;
use pod_lifecycle::config::Cli;
use pod_lifecycle::config::Commands;
use pod_lifecycle::config::TrackArgs;
use pod_lifecycle::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track(track_args) => run_tracker(*track_args).await,
    }
}

async fn run_tracker(track_args: TrackArgs) -> Result<()> {
    let _guard = logging::init(track_args.summary_file.as_ref())
        .context("initialize summary log file failed")?;

    tracing::info!("Starting pod lifecycle tracker {}", &**version::VERSION);

    let app = Application::new(track_args);
    app.run().await
}
