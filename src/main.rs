mod dto;
mod export;
mod gate;
mod geocoder;
mod resolver;
mod store;
mod telegram;
mod telematics;
#[cfg(test)]
mod testing;
mod tracker;
mod util;

use std::{env, process::exit};

use export::ExportBundle;
use geocoder::NominatimClient;
use resolver::AddressResolver;
use store::PositionStore;
use telegram::TelegramSink;
use telematics::TargaClient;
use tracing::{error, info};
use tracker::Tracker;
use util::{
    config::{get_config, Settings},
    connect_to_db, setup_tracing,
};

type LiveTracker = Tracker<TargaClient, NominatimClient, TelegramSink>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    if let (Some(git_describe), Some(git_sha), Some(build_timestamp)) = (
        option_env!("VERGEN_GIT_DESCRIBE"),
        option_env!("VERGEN_GIT_SHA"),
        option_env!("VERGEN_BUILD_TIMESTAMP"),
    ) {
        info!(
            "Vehicle tracker {} ({} {})",
            git_describe, git_sha, build_timestamp
        );
    }

    let args: Vec<String> = env::args().collect();
    let choice = args.get(1).cloned().unwrap_or("run".into());

    let settings = Settings::from_config(get_config())?;

    match choice.as_str() {
        "run" => handle_result(run(settings).await),
        "once" => handle_result(once(settings).await),
        "export" => handle_result(export(settings).await),
        "check-telegram" => handle_result(check_telegram(settings).await),
        _ => println!("Make a valid choice (run, once, export, check-telegram)"),
    }

    Ok(())
}

fn handle_result(res: anyhow::Result<()>) {
    if let Err(err) = res {
        error!("An error occurred: {:?}", err);
        exit(1)
    }
}

async fn build_tracker(settings: &Settings) -> anyhow::Result<LiveTracker> {
    let pool = connect_to_db(&settings.database_url).await?;

    Ok(Tracker::new(
        PositionStore::new(pool),
        TargaClient::new(settings.telematics.clone())?,
        AddressResolver::new(
            NominatimClient::new(&settings.geocoder)?,
            settings.geocoder.cooldown,
        ),
        TelegramSink::new(settings.telegram.clone())?,
        settings.fetch_mode,
        settings.notify_cadence,
        settings.export_dir.clone(),
    ))
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let tracker = build_tracker(&settings).await?;
    tracker::start_server(tracker, settings.poll_interval).await
}

async fn once(settings: Settings) -> anyhow::Result<()> {
    let tracker = build_tracker(&settings).await?;
    let mut session = gate::Session::default();

    let outcome = tracker.run_poll_cycle(&mut session).await;
    info!("Poll cycle finished: {:?}", outcome);

    let gate = tracker.maybe_send_bulk_export(&mut session).await;
    info!("Notification check finished: {:?}", gate);

    Ok(())
}

async fn export(settings: Settings) -> anyhow::Result<()> {
    let store = PositionStore::new(connect_to_db(&settings.database_url).await?);
    let fixes = store.load().await?;

    ExportBundle::render(&fixes)?
        .write_to(&settings.export_dir)
        .await?;
    info!(
        "Exported {} positions to {}",
        fixes.len(),
        settings.export_dir.display()
    );

    Ok(())
}

async fn check_telegram(settings: Settings) -> anyhow::Result<()> {
    TelegramSink::new(settings.telegram)?
        .check_connection()
        .await?;
    Ok(())
}
