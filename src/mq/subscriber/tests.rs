use super::*;
use crate::bus::{BusError, MockConsumerFactory};
use crate::config::ConfigError;

fn isolated(factory: &MockConsumerFactory, registry: &Arc<SubscriptionRegistry>) -> Subscriber {
    Subscriber::with_registry(
        QueueConfig::new("test-queue"),
        Arc::new(factory.clone()),
        Arc::clone(registry),
    )
    .unwrap()
}

#[test]
fn test_missing_queue_url_fails_before_backend() {
    let factory = MockConsumerFactory::new();
    let result = Subscriber::with_registry(
        QueueConfig::default(),
        Arc::new(factory.clone()),
        Arc::new(SubscriptionRegistry::new()),
    );

    assert!(matches!(
        result,
        Err(BusError::Configuration(ConfigError::MissingField {
            field: "queue_url"
        }))
    ));
    assert_eq!(factory.loop_count(), 0);
}

#[test]
fn test_new_subscriber_is_idle() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);

    assert!(!subscriber.is_subscribed());
    assert!(subscriber.active_channel().is_none());
    assert!(subscriber.subscribed_channels().is_empty());
}

#[test]
fn test_subscribe_starts_loop_and_registers() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);

    subscriber.subscribe("foo").unwrap();

    assert!(subscriber.is_subscribed());
    assert_eq!(subscriber.active_channel().as_deref(), Some("foo"));
    assert_eq!(subscriber.subscribed_channels(), vec!["foo"]);
    assert_eq!(factory.running_count(), 1);
    assert_eq!(factory.loops()[0].queue_url(), "test-queue");
}

#[test]
fn test_resubscribe_same_channel_replaces_loop() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);

    subscriber.subscribe("foo").unwrap();
    subscriber.subscribe("foo").unwrap();

    let loops = factory.loops();
    assert_eq!(loops.len(), 2);
    assert!(!loops[0].is_running());
    assert_eq!(loops[0].stop_count(), 1);
    assert!(loops[1].is_running());
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_subscribe_new_channel_stops_previous_loop() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);

    subscriber.subscribe("foo").unwrap();
    subscriber.subscribe("bar").unwrap();

    assert_eq!(factory.running_count(), 1);
    assert_eq!(subscriber.active_channel().as_deref(), Some("bar"));
    // The earlier channel stays registered until explicitly unsubscribed
    assert_eq!(subscriber.subscribed_channels(), vec!["bar", "foo"]);
}

#[test]
fn test_unsubscribe_stops_loop_and_removes_entry() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);

    subscriber.subscribe("foo").unwrap();
    subscriber.unsubscribe("foo");

    assert!(!subscriber.is_subscribed());
    assert_eq!(factory.running_count(), 0);
    assert!(registry.is_empty());

    // Second call is a no-op
    subscriber.unsubscribe("foo");
    assert!(registry.is_empty());
}

#[test]
fn test_unsubscribe_unknown_channel_leaves_registry() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);
    let other = isolated(&factory, &registry);

    other.subscribe("foo").unwrap();
    subscriber.unsubscribe("bar");

    assert_eq!(registry.channels(), vec!["foo"]);
    assert!(other.is_subscribed());
}

#[test]
fn test_failed_create_leaves_subscriber_idle() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);

    factory.set_fail_on_create(true);
    assert!(subscriber.subscribe("foo").is_err());
    assert!(!subscriber.is_subscribed());
    assert!(registry.is_empty());
}

#[test]
fn test_delivery_is_tagged_and_acknowledged() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);
    let mut events = subscriber.listen();

    subscriber.subscribe("message_processed").unwrap();
    assert_eq!(factory.deliver("body"), Some(true));

    let delivery = events.try_recv().unwrap();
    assert_eq!(
        delivery,
        Delivery {
            channel: "message_processed".to_string(),
            body: Some("body".to_string()),
        }
    );
    assert!(events.try_recv().is_err());
}

#[test]
fn test_delivery_without_listeners_is_still_acknowledged() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);

    subscriber.subscribe("foo").unwrap();
    assert_eq!(factory.deliver("body"), Some(true));
}

#[test]
fn test_delivery_after_drop_is_acknowledged() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);
    subscriber.subscribe("foo").unwrap();
    drop(subscriber);

    // Drop stopped the loop, but the handler itself still acks
    assert_eq!(factory.running_count(), 0);
    assert!(factory.loops()[0].deliver(ReceivedMessage::with_body("late")));
}

#[test]
fn test_every_listener_receives_delivery() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);
    let mut first = subscriber.listen();
    let mut second = subscriber.listen();

    subscriber.subscribe("foo").unwrap();
    factory.deliver("hello");

    assert_eq!(first.try_recv().unwrap().body.as_deref(), Some("hello"));
    assert_eq!(second.try_recv().unwrap().body.as_deref(), Some("hello"));
}

#[test]
fn test_debug_shows_active_channel() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);
    subscriber.subscribe("foo").unwrap();

    let debug = format!("{:?}", subscriber);
    assert!(debug.contains("active_channel: Some(\"foo\")"));
}

#[test]
fn test_slow_listener_receives_every_acknowledged_delivery() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);
    let mut events = subscriber.listen();
    subscriber.subscribe("bulk").unwrap();

    // Nothing is read until every message was acknowledged
    for i in 0..1100 {
        assert_eq!(factory.deliver(&i.to_string()), Some(true));
    }

    for i in 0..1100 {
        let delivery = events.try_recv().unwrap();
        assert_eq!(delivery.body, Some(i.to_string()));
    }
    assert!(events.try_recv().is_err());
}

#[test]
fn test_dropped_listener_is_pruned() {
    let factory = MockConsumerFactory::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let subscriber = isolated(&factory, &registry);
    let dropped = subscriber.listen();
    let mut kept = subscriber.listen();
    subscriber.subscribe("foo").unwrap();
    drop(dropped);

    assert_eq!(factory.deliver("one"), Some(true));
    assert_eq!(kept.try_recv().unwrap().body.as_deref(), Some("one"));
    assert_eq!(lock(&subscriber.listeners).len(), 1);
}
