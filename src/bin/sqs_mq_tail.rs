//! sqs-mq-tail: log every message delivered on a channel.
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - SQS_MQ__QUEUE__QUEUE_URL etc.: config overrides
//! - SQS_MQ_CHANNEL: channel to subscribe to (default: "default")
//! - SQS_MQ_LOG: log filter (default: info)

use tracing::info;

use sqs_mq::utils::bootstrap::init_tracing;
use sqs_mq::{create_subscriber, Config};

const CHANNEL_ENV_VAR: &str = "SQS_MQ_CHANNEL";
const DEFAULT_CHANNEL: &str = "default";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;
    let channel = std::env::var(CHANNEL_ENV_VAR).unwrap_or_else(|_| DEFAULT_CHANNEL.to_string());

    let subscriber = create_subscriber(&config).await?;
    let mut deliveries = subscriber.listen();
    subscriber.subscribe(&channel)?;

    info!(channel = %channel, "sqs-mq-tail started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => info!(
                    channel = %delivery.channel,
                    body = delivery.body.as_deref().unwrap_or(""),
                    "Message"
                ),
                None => break,
            },
        }
    }

    subscriber.unsubscribe(&channel);
    info!(channel = %channel, "sqs-mq-tail stopped");
    Ok(())
}
