use dotenvy::dotenv;
use review_notifier::bot::{NotificationSink, TelegramSink};
use review_notifier::config::Settings;
use review_notifier::logging::{init_logging, TelegramLogLayer};
use review_notifier::poller::Poller;
use review_notifier::review::DvmnClient;
use std::sync::Arc;
use teloxide::Bot;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let settings = init_settings();

    let token = match settings.bot_token() {
        Ok(token) => token.to_string(),
        Err(e) => fail_startup(&e),
    };
    let destination = match settings.chat_id() {
        Ok(destination) => destination,
        Err(e) => fail_startup(&e),
    };

    let sink: Arc<dyn NotificationSink> = Arc::new(TelegramSink::new(Bot::new(token)));

    if settings.log_to_telegram {
        let (layer, forwarder) = TelegramLogLayer::new(
            Arc::clone(&sink),
            destination.clone(),
            settings.telegram_log_level(),
        );
        tokio::spawn(forwarder.run());
        init_logging(Some(layer));
    } else {
        init_logging(None);
    }

    info!("Starting review notifier...");

    let client = DvmnClient::new(
        settings.reviews_url.clone(),
        settings.dvmn_token(),
        settings.poll_timeout(),
        settings.connect_timeout(),
    )?;

    let poller = Poller::new(
        Arc::new(client),
        sink,
        destination,
        settings.poller_config(),
    );

    tokio::select! {
        () = poller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down.");
        }
    }

    Ok(())
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => s,
        Err(e) => fail_startup(&e),
    }
}

/// Logs a configuration error to stderr and exits before polling starts.
fn fail_startup(e: &dyn std::fmt::Display) -> ! {
    init_logging(None);
    error!("Failed to load configuration: {}", e);
    std::process::exit(1);
}
