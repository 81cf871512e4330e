//! Channel scenarios over a real endpoint.

use std::time::Duration;

use serde_json::{Value, json};

use super::util::{self, Client};
use crate::comm::message::ErrorKind;
use crate::error::BrokerError;
use crate::ipc::{BROKER_SERVICE, IpcChannel, MethodSet, ServiceError};

const TIMEOUT: Duration = Duration::from_secs(10);

fn started(endpoint: &str) -> IpcChannel {
    let mut channel = IpcChannel::open(endpoint, &[]).unwrap();
    channel
        .register_service(
            "echo",
            MethodSet::new()
                .method("say", |args: Value| Ok(args))
                .method("fail", |_| Err(ServiceError::new("refused")))
                .method("explode", |_| panic!("boom")),
        )
        .unwrap();
    channel.start().unwrap();
    channel
}

#[test]
fn ping_round_trip() {
    let (endpoint, _dir) = util::endpoint();
    let mut channel = started(&endpoint);

    let mut client = Client::connect(&endpoint);
    let resp = client.call(BROKER_SERVICE, "ping", json!("hello"));
    assert!(resp.is_ok());
    assert_eq!(resp.result, json!({ "pong": "hello" }));

    let resp = client.call(BROKER_SERVICE, "version", Value::Null);
    assert_eq!(resp.result, json!(env!("CARGO_PKG_VERSION")));

    let resp = client.call("echo", "say", json!([1, 2, 3]));
    assert_eq!(resp.result, json!([1, 2, 3]));

    assert_eq!(channel.session_count(), 1);
    drop(client);
    assert!(util::wait_until(TIMEOUT, || channel.session_count() == 0));
    channel.stop().unwrap();
}

#[test]
fn second_open_of_endpoint_fails_and_first_keeps_serving() {
    let (endpoint, _dir) = util::endpoint();
    let mut first = started(&endpoint);

    let second = IpcChannel::open(&endpoint, &[]);
    assert!(matches!(second, Err(BrokerError::Channel(_))));

    let mut client = Client::connect(&endpoint);
    assert!(client.call(BROKER_SERVICE, "ping", Value::Null).is_ok());
    drop(client);
    first.stop().unwrap();
}

#[test]
fn malformed_request_keeps_session_open() {
    let (endpoint, _dir) = util::endpoint();
    let mut channel = started(&endpoint);
    let mut client = Client::connect(&endpoint);

    client.send_raw(b"this is not json").unwrap();
    let resp = client.receive().unwrap().unwrap();
    assert_eq!(resp.error.unwrap().kind, ErrorKind::MalformedRequest);

    client.send_raw(br#"{"id": 41, "service": 3}"#).unwrap();
    let resp = client.receive().unwrap().unwrap();
    assert_eq!(resp.id, 41);
    assert_eq!(resp.error.unwrap().kind, ErrorKind::MalformedRequest);

    assert!(client.call(BROKER_SERVICE, "ping", Value::Null).is_ok());
    drop(client);
    channel.stop().unwrap();
}

#[test]
fn unknown_service_and_method() {
    let (endpoint, _dir) = util::endpoint();
    let mut channel = started(&endpoint);
    let mut client = Client::connect(&endpoint);

    let resp = client.call("nobody", "ping", Value::Null);
    assert_eq!(resp.error.unwrap().kind, ErrorKind::UnknownService);

    let resp = client.call(BROKER_SERVICE, "nothing", Value::Null);
    assert_eq!(resp.error.unwrap().kind, ErrorKind::UnknownMethod);

    drop(client);
    channel.stop().unwrap();
}

#[test]
fn handler_failures_are_reported() {
    let (endpoint, _dir) = util::endpoint();
    let mut channel = started(&endpoint);
    let mut client = Client::connect(&endpoint);

    let resp = client.call("echo", "fail", Value::Null);
    let err = resp.error.unwrap();
    assert_eq!(err.kind, ErrorKind::HandlerFailed);
    assert_eq!(err.message, "refused");

    let resp = client.call("echo", "explode", Value::Null);
    let err = resp.error.unwrap();
    assert_eq!(err.kind, ErrorKind::HandlerFailed);
    assert!(err.message.contains("boom"), "{}", err.message);

    // Same session, still served.
    assert!(client.call(BROKER_SERVICE, "ping", Value::Null).is_ok());
    drop(client);
    channel.stop().unwrap();
}

#[test]
fn oversized_frame_closes_session() {
    let (endpoint, _dir) = util::endpoint();
    let mut channel = IpcChannel::open(&endpoint, &[]).unwrap().with_max_payload_size(64);
    channel.start().unwrap();
    let mut client = Client::connect(&endpoint);

    // Header announces 4096 bytes.
    client.send_bytes(&[0x00, 0x00, 0x10, 0x00, b'{', b'}']).unwrap();
    assert!(client.is_closed());
    assert!(util::wait_until(TIMEOUT, || channel.session_count() == 0));

    let mut other = Client::connect(&endpoint);
    assert!(other.call(BROKER_SERVICE, "ping", Value::Null).is_ok());
    drop(other);
    channel.stop().unwrap();
}

#[test]
fn stop_does_not_wait_for_idle_clients() {
    let (endpoint, _dir) = util::endpoint();
    let mut channel = started(&endpoint);

    let mut idle = Client::connect(&endpoint);
    let mut busy = Client::connect(&endpoint);
    assert!(busy.call(BROKER_SERVICE, "ping", Value::Null).is_ok());
    assert!(util::wait_until(TIMEOUT, || channel.session_count() == 2));

    let (channel, result) = util::finishes_within(TIMEOUT, move || {
        let r = channel.stop();
        (channel, r)
    });
    result.unwrap();
    assert!(!channel.is_running());
    assert_eq!(channel.session_count(), 0);
    assert!(idle.is_closed());
    assert!(busy.is_closed());
}

#[test]
fn stop_without_clients_and_twice() {
    let (endpoint, _dir) = util::endpoint();
    let mut channel = started(&endpoint);
    assert!(channel.is_running());
    util::finishes_within(TIMEOUT, move || {
        channel.stop().unwrap();
        channel.stop().unwrap();
    });
}

#[test]
fn register_after_start_is_rejected() {
    let (endpoint, _dir) = util::endpoint();
    let mut channel = started(&endpoint);
    let r = channel.register_service("late", MethodSet::new());
    assert!(matches!(r, Err(BrokerError::Channel(_))));

    let mut client = Client::connect(&endpoint);
    let resp = client.call("late", "anything", Value::Null);
    assert_eq!(resp.error.unwrap().kind, ErrorKind::UnknownService);
    drop(client);
    channel.stop().unwrap();
}

#[test]
fn endpoint_is_reusable_after_drop() {
    let (endpoint, _dir) = util::endpoint();
    let channel = started(&endpoint);
    drop(channel);

    let mut again = started(&endpoint);
    let mut client = Client::connect(&endpoint);
    assert!(client.call(BROKER_SERVICE, "ping", Value::Null).is_ok());
    drop(client);
    again.stop().unwrap();
}
