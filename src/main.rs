/// CineShelf notification service
///
/// Stores device push tokens and preferences, keeps each user's notification
/// inbox, and fans social activity out to followers and watchers.
use cineshelf::{config::ServerConfig, context::AppContext, error::NotifyResult, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> NotifyResult<()> {
    // Load configuration first so logging can honor it
    let config = ServerConfig::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("cineshelf={},tower_http=debug", config.logging.level).into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    print_banner();

    let ctx = AppContext::new(config).await?;
    let ctx = Arc::new(ctx);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
   _____ _              _____ _          _  __
  / ____(_)            / ____| |        | |/ _|
 | |     _ _ __   ___ | (___ | |__   ___| | |_
 | |    | | '_ \ / _ \ \___ \| '_ \ / _ \ |  _|
 | |____| | | | |  __/ ____) | | | |  __/ | |
  \_____|_|_| |_|\___||_____/|_| |_|\___|_|_|

        Notification service v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
