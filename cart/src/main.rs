//! Abandoned cart demo binary
//!
//! Starts one cart session and feeds it JSON signals read from stdin, one per line.
//! A line reading `getCart` prints the current cart. Ctrl-C cancels the session.
//!
//! ```text
//! {"route":"ADD_TO_CART","item":{"productId":1,"quantity":1}}
//! {"route":"UPDATE_EMAIL","email":"someone@example.com"}
//! getCart
//! ```

use abandoned_cart::{
    CART_CHANNEL, CartConfig, CartError, CartState, CartWorkflow, GET_CART_QUERY,
    LoggingNotifier,
};
use abandoned_cart_runtime::metrics::MetricsServer;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "abandoned_cart=debug,abandoned_cart_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CartConfig::from_env()?;

    let mut metrics = MetricsServer::new(config.metrics.addr);
    if config.metrics.enabled {
        metrics.start()?;
    }

    let workflow_id = format!("CART-{}", chrono::Utc::now().timestamp());
    let handle = CartWorkflow::start(
        &workflow_id,
        CartState::new("user@example.com"),
        &config,
        Arc::new(LoggingNotifier),
    )?;

    tracing::info!(
        %workflow_id,
        channel = CART_CHANNEL,
        "Reading signals from stdin, one JSON object per line (Ctrl-C to stop)"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Ctrl-C received, cancelling session");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    None => {
                        tracing::info!("stdin closed, session keeps running until Ctrl-C");
                        stdin_open = false;
                    },
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if line == GET_CART_QUERY {
                            let cart = handle.query_json(GET_CART_QUERY).await?;
                            println!("{}", serde_json::to_string_pretty(&cart)?);
                            continue;
                        }
                        match handle.signal_json(CART_CHANNEL, line).await {
                            Ok(()) => {},
                            // Already logged; the session is unaffected
                            Err(CartError::Signal(_)) => {},
                            Err(error) => return Err(error.into()),
                        }
                    },
                }
            }
        }
    }

    let cart = handle.get_cart().await;
    handle.cancel();
    let exit = handle.join().await?;

    println!("{}", serde_json::to_string_pretty(&cart)?);
    if let Some(rendered) = metrics.render() {
        println!("{rendered}");
    }
    tracing::info!(?exit, "Session stopped");
    Ok(())
}
