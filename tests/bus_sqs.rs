//! SQS backend integration tests using testcontainers.
//!
//! Run with: cargo test --test bus_sqs -- --ignored --nocapture
//!
//! Uses LocalStack to emulate SQS locally. Tests share a single
//! LocalStack container.

#![cfg(feature = "sqs")]

use std::time::Duration;

use aws_config::BehaviorVersion;
use serde_json::json;
use sqs_mq::{create_publisher, create_subscriber, BackendType, Config, Delivery, QueueConfig};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tokio::sync::{mpsc, OnceCell};

const REGION: &str = "us-east-1";

/// Shared LocalStack container and endpoint URL.
static LOCALSTACK: OnceCell<(ContainerAsync<GenericImage>, String)> = OnceCell::const_new();

async fn get_localstack_endpoint() -> String {
    let (_, endpoint) = LOCALSTACK
        .get_or_init(|| async {
            println!("Starting shared LocalStack container...");
            let (container, endpoint) = start_localstack_internal().await;
            println!("LocalStack available at: {}", endpoint);
            (container, endpoint)
        })
        .await;
    endpoint.clone()
}

async fn start_localstack_internal() -> (ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("localstack/localstack", "latest")
        .with_exposed_port(4566.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready."));

    let container = image
        .with_env_var("SERVICES", "sqs")
        .with_env_var("AWS_DEFAULT_REGION", REGION)
        .with_env_var("EAGER_SERVICE_LOADING", "1")
        .with_env_var("DISABLE_EVENTS", "1")
        .with_env_var("SKIP_INFRA_DOWNLOADS", "1")
        .with_env_var("LOCALSTACK_HOST", "localhost")
        .with_startup_timeout(Duration::from_secs(180))
        .start()
        .await
        .expect("Failed to start localstack container");

    let host_port = container
        .get_host_port_ipv4(4566)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    (container, format!("http://{}:{}", host, host_port))
}

/// Create a fresh queue and return a config pointing at it.
async fn create_queue(endpoint: &str, name: &str) -> Config {
    // LocalStack accepts any static credentials
    std::env::set_var("AWS_ACCESS_KEY_ID", "test");
    std::env::set_var("AWS_SECRET_ACCESS_KEY", "test");

    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(REGION))
        .endpoint_url(endpoint)
        .load()
        .await;
    let client = aws_sdk_sqs::Client::new(&aws_config);

    let output = client
        .create_queue()
        .queue_name(name)
        .send()
        .await
        .expect("Failed to create queue");
    let queue_url = output.queue_url().expect("queue url").to_string();
    println!("Created queue: {}", queue_url);

    let mut queue = QueueConfig::new(queue_url)
        .with_region(REGION)
        .with_endpoint(endpoint);
    queue.polling.wait_time_secs = 1;

    Config {
        backend: BackendType::Sqs,
        queue,
    }
}

async fn next(events: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(15), events.recv())
        .await
        .expect("Timed out waiting for delivery")
        .expect("Delivery channel closed")
}

#[tokio::test]
#[ignore = "requires docker (LocalStack)"]
async fn test_sqs_publish_and_receive() {
    println!("=== SQS Publish and Receive Test ===");

    let endpoint = get_localstack_endpoint().await;
    let config = create_queue(&endpoint, "sqs-mq-publish-receive").await;

    let subscriber = create_subscriber(&config).await.expect("subscriber");
    let publisher = create_publisher(&config).await.expect("publisher");
    let mut events = subscriber.listen();

    subscriber.subscribe("message_processed").unwrap();
    publisher.publish("message_processed", "body");

    let delivery = next(&mut events).await;
    assert_eq!(delivery.channel, "message_processed");
    assert_eq!(delivery.body.as_deref(), Some("body"));

    subscriber.unsubscribe("message_processed");
    println!("=== SQS Publish and Receive Test PASSED ===");
}

#[tokio::test]
#[ignore = "requires docker (LocalStack)"]
async fn test_sqs_batch_larger_than_one_request() {
    println!("=== SQS Chunked Batch Test ===");

    let endpoint = get_localstack_endpoint().await;
    let config = create_queue(&endpoint, "sqs-mq-chunked-batch").await;

    let subscriber = create_subscriber(&config).await.expect("subscriber");
    let publisher = create_publisher(&config).await.expect("publisher");
    let mut events = subscriber.listen();

    subscriber.subscribe("bulk").unwrap();
    let batch: Vec<_> = (0..15).map(|i| json!({ "n": i })).collect();
    publisher.publish("bulk", batch);

    let mut seen = Vec::new();
    for _ in 0..15 {
        seen.push(next(&mut events).await.body.expect("body"));
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 15);

    subscriber.unsubscribe("bulk");
    println!("=== SQS Chunked Batch Test PASSED ===");
}
