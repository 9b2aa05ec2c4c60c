use anyhow::Context;
use media_bus::{
    catalog::Catalog,
    controller::{Controller, Outcome},
    recorder::Recorder,
};

mod config;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("media_bus", log::LevelFilter::Debug)
        .filter_module("tee_rec", log::LevelFilter::Trace)
        .init();
}

fn assemble() -> anyhow::Result<Controller> {
    let config = config::config();
    let catalog = Catalog::new().with_queue_capacity(config.queue_capacity);
    let recorder =
        Recorder::assemble(&catalog, config).context("Not all elements could be created.")?;
    log::info!("recording {} to {}", config.uri, config.location);
    Controller::new(recorder).context("Pipeline could not be set up.")
}

async fn record(mut controller: Controller) -> Outcome {
    if controller.start().is_err() {
        return controller.outcome();
    }
    let finished = tokio::select! {
        outcome = controller.run() => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    match finished {
        Some(outcome) => outcome,
        None => {
            log::warn!("interrupted, stopping");
            controller.shutdown().await;
            controller.outcome()
        }
    }
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let controller = assemble().unwrap_or_else(|e| {
        log::error!("{:#}", e);
        std::process::exit(-1);
    });

    let outcome = record(controller).await;
    if let Some(error) = &outcome.error {
        log::error!("{} failed: {}", error.node, error.message);
    }
    log::info!("finished in state {:?}", outcome.state);
    std::process::exit(outcome.exit_code());
}
