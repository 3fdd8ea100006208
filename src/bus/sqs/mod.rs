//! Amazon SQS queue backend.
//!
//! Publishing uses `SendMessageBatch`, split into chunks of at most
//! `batch_size` entries. Subscribing runs a long-polling `ReceiveMessage`
//! loop on a tokio task; each message is deleted once its `Completion`
//! fires, otherwise it reappears after the visibility timeout.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, Message, MessageSystemAttributeName, SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client as SqsClient;
use backon::BackoffBuilder;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    validate_envelopes, BusError, Completion, ConsumerFactory, DeliveryHandler, Envelope,
    QueueProducer, ReceiveLoop, ReceivedMessage, Result,
};
use crate::config::{PollingConfig, QueueConfig};
use crate::utils::retry::receive_backoff;

/// Delay used once the receive backoff is exhausted.
const MAX_RECEIVE_DELAY: Duration = Duration::from_secs(10);

/// Handle to an SQS endpoint, shared by producers and receive loops.
#[derive(Clone, Debug)]
pub struct SqsBackend {
    sqs: SqsClient,
}

impl SqsBackend {
    /// Load AWS config for the queue's region/endpoint and build a client.
    ///
    /// Only `region` and `endpoint_url` are read; callers validate the rest.
    pub async fn connect(config: &QueueConfig) -> Self {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            aws_config_builder = aws_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        info!(
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            "Connected to AWS SQS"
        );

        Self::from_client(SqsClient::new(&aws_config))
    }

    /// Wrap an already configured client.
    pub fn from_client(sqs: SqsClient) -> Self {
        Self { sqs }
    }

    pub fn producer(&self, config: &QueueConfig) -> Result<SqsProducer> {
        config.validate()?;
        self.producer_for(config)
    }

    /// Producer for an already validated config.
    pub(crate) fn producer_for(&self, config: &QueueConfig) -> Result<SqsProducer> {
        Ok(SqsProducer {
            sqs: self.sqs.clone(),
            queue_url: config.queue_url()?.to_string(),
            batch_size: config.batch_size,
        })
    }

    pub fn consumer_factory(&self) -> SqsConsumerFactory {
        SqsConsumerFactory {
            sqs: self.sqs.clone(),
        }
    }
}

/// Build the `SendMessageBatch` entry for one envelope.
fn batch_entry(envelope: &Envelope) -> Result<SendMessageBatchRequestEntry> {
    let body = envelope
        .body_text()
        .ok_or_else(|| BusError::Payload(super::MISSING_ID_OR_BODY.to_string()))?;

    SendMessageBatchRequestEntry::builder()
        .id(&envelope.id)
        .message_body(body)
        .build()
        .map_err(|e| BusError::Payload(format!("Failed to build batch entry: {}", e)))
}

/// Summarize the failed entries of a batch send.
fn describe_failures(failed: &[BatchResultErrorEntry]) -> String {
    let entries: Vec<String> = failed
        .iter()
        .map(|entry| {
            format!(
                "{} ({}{}): {}",
                entry.id(),
                entry.code(),
                if entry.sender_fault() { ", sender fault" } else { "" },
                entry.message().unwrap_or("no message")
            )
        })
        .collect();
    format!("{} message(s) failed: {}", failed.len(), entries.join("; "))
}

/// Producer sending envelopes to one SQS queue.
pub struct SqsProducer {
    sqs: SqsClient,
    queue_url: String,
    batch_size: usize,
}

#[async_trait]
impl QueueProducer for SqsProducer {
    async fn send(&self, envelopes: Vec<Envelope>) -> Result<()> {
        validate_envelopes(&envelopes)?;

        for chunk in envelopes.chunks(self.batch_size.max(1)) {
            let entries = chunk.iter().map(batch_entry).collect::<Result<Vec<_>>>()?;

            let output = self
                .sqs
                .send_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| BusError::Delivery(format!("Failed to send message batch: {}", e)))?;

            let failed = output.failed();
            if !failed.is_empty() {
                return Err(BusError::Delivery(describe_failures(failed)));
            }

            debug!(
                queue_url = %self.queue_url,
                count = chunk.len(),
                "Sent message batch to SQS"
            );
        }

        Ok(())
    }
}

/// Creates long-polling receive loops.
#[derive(Clone, Debug)]
pub struct SqsConsumerFactory {
    sqs: SqsClient,
}

impl ConsumerFactory for SqsConsumerFactory {
    fn create(&self, config: &QueueConfig, handler: DeliveryHandler) -> Result<Box<dyn ReceiveLoop>> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| BusError::Subscribe(format!("No tokio runtime: {}", e)))?;

        Ok(Box::new(SqsReceiveLoop {
            sqs: self.sqs.clone(),
            queue_url: config.queue_url()?.to_string(),
            polling: config.polling.clone(),
            handler,
            runtime,
            shutdown: None,
        }))
    }
}

struct SqsReceiveLoop {
    sqs: SqsClient,
    queue_url: String,
    polling: PollingConfig,
    handler: DeliveryHandler,
    runtime: Handle,
    shutdown: Option<watch::Sender<bool>>,
}

impl ReceiveLoop for SqsReceiveLoop {
    fn start(&mut self) {
        if self.shutdown.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let sqs = self.sqs.clone();
        let queue_url = self.queue_url.clone();
        let polling = self.polling.clone();
        let handler = self.handler.clone();

        self.runtime.spawn(async move {
            info!(queue_url = %queue_url, "Starting SQS consumer");
            poll(&sqs, &queue_url, &polling, &handler, shutdown_rx).await;
            info!(queue_url = %queue_url, "SQS consumer stopped");
        });
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }

    fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }
}

impl Drop for SqsReceiveLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll(
    sqs: &SqsClient,
    queue_url: &str,
    polling: &PollingConfig,
    handler: &DeliveryHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = receive_backoff().build();
    let poll_delay = Duration::from_millis(polling.poll_delay_ms);

    loop {
        if *shutdown.borrow() {
            return;
        }

        let request = sqs
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(polling.max_messages)
            .wait_time_seconds(polling.wait_time_secs)
            .set_visibility_timeout(polling.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_attribute_names("All")
            .send();

        let result = tokio::select! {
            _ = shutdown.changed() => return,
            result = request => result,
        };

        match result {
            Ok(output) => {
                backoff = receive_backoff().build();

                let messages = output.messages();
                if messages.is_empty() {
                    debug!(queue_url = %queue_url, "Queue empty");
                }
                for message in messages {
                    process_message(sqs, queue_url, handler, message).await;
                }
            }
            Err(e) => {
                let delay = backoff.next().unwrap_or(MAX_RECEIVE_DELAY);
                error!(
                    queue_url = %queue_url,
                    error = %e,
                    retry_in = ?delay,
                    "Failed to receive messages from SQS"
                );
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        }

        if !poll_delay.is_zero() {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(poll_delay) => {}
            }
        }
    }
}

/// Convert an SQS message into the backend-neutral form.
fn received_message(message: &Message) -> ReceivedMessage {
    let receive_count = message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    ReceivedMessage {
        message_id: message.message_id().map(str::to_string),
        body: message.body().map(str::to_string),
        receive_count,
    }
}

async fn process_message(
    sqs: &SqsClient,
    queue_url: &str,
    handler: &DeliveryHandler,
    message: &Message,
) {
    let received = received_message(message);
    let message_id = received.message_id.clone().unwrap_or_default();
    debug!(queue_url = %queue_url, message_id = %message_id, "Message received");

    let (completion, acked) = Completion::pair();
    handler(received, completion);

    if acked.await.is_err() {
        warn!(
            queue_url = %queue_url,
            message_id = %message_id,
            "Message not acknowledged, left for visibility timeout"
        );
        return;
    }

    let Some(receipt) = message.receipt_handle() else {
        warn!(message_id = %message_id, "Message has no receipt handle, cannot delete");
        return;
    };

    match sqs
        .delete_message()
        .queue_url(queue_url)
        .receipt_handle(receipt)
        .send()
        .await
    {
        Ok(_) => debug!(queue_url = %queue_url, message_id = %message_id, "Message processed"),
        Err(e) => error!(
            queue_url = %queue_url,
            message_id = %message_id,
            error = %e,
            "Failed to delete processed message"
        ),
    }
}
