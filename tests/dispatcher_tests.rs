//! Integration tests for handler dispatch over a live connection
//!
//! # Test Coverage
//!
//! - Immediate, deferred, member-style and typed handlers
//! - Handler errors and panics answered with `handler_failed`
//! - Responders handed to other coroutines or dropped
//! - Registry changes while traffic is flowing

mod common;

use common::{CallError, TestServer, TesterConfig};
use mayrpc::error::HandlerError;
use mayrpc::protocol::{function_id, RpcErrorCode};
use mayrpc::registry::HandlerDescriptor;
use mayrpc::typed::{decode_body, encode_args, Handler, TypedRequest};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn handler_failed(result: Result<Vec<u8>, CallError>) -> String {
    match result {
        Err(CallError::Rpc(err)) => {
            assert_eq!(err.code, RpcErrorCode::HandlerFailed);
            err.message
        }
        other => panic!("expected handler_failed, got {other:?}"),
    }
}

#[test]
fn test_handler_errors_keep_connection_open() {
    let handlers = vec![
        HandlerDescriptor::immediate("fail", |_| Err(HandlerError::new("rejected"))),
        HandlerDescriptor::immediate("anyhow", |_| {
            Err(anyhow::anyhow!("disk full").context("saving").into())
        }),
        HandlerDescriptor::immediate("boom", |_| panic!("handler blew up")),
        HandlerDescriptor::deferred("deferred_boom", |_, _| panic!("deferred blew up")),
        HandlerDescriptor::immediate("ok", |_| Ok(b"fine".to_vec())),
    ];
    let fixture = TestServer::start(TesterConfig::default(), handlers);
    let mut client = fixture.client();

    assert_eq!(handler_failed(client.call(function_id("fail"), b"")), "rejected");
    assert_eq!(
        handler_failed(client.call(function_id("anyhow"), b"")),
        "saving: disk full"
    );
    assert!(handler_failed(client.call(function_id("boom"), b"")).contains("handler blew up"));
    handler_failed(client.call(function_id("deferred_boom"), b""));
    assert_eq!(client.call(function_id("ok"), b"").unwrap(), b"fine");
}

#[test]
fn test_responder_can_move_to_another_coroutine() {
    let relay = HandlerDescriptor::deferred("relay", |req, responder| {
        let (tx, rx) = may::sync::mpsc::channel();
        let worker = may::go!(move || {
            let args: Vec<u8> = rx.recv().unwrap();
            may::coroutine::sleep(Duration::from_millis(20));
            responder.ok([b"relayed:".as_slice(), &args].concat());
        });
        tx.send(req.args).unwrap();
        worker.join().unwrap();
    });
    let fixture = TestServer::start(TesterConfig::default(), vec![relay]);
    assert_eq!(
        fixture.client().call(function_id("relay"), b"x").unwrap(),
        b"relayed:x"
    );
}

#[test]
fn test_dropped_responder_answers_with_error() {
    let forgetful = HandlerDescriptor::deferred("forgetful", |_, responder| drop(responder));
    let fixture = TestServer::start(
        TesterConfig::default(),
        vec![forgetful, HandlerDescriptor::immediate("ok", |_| Ok(b"ok".to_vec()))],
    );
    let mut client = fixture.client();
    assert!(handler_failed(client.call(function_id("forgetful"), b""))
        .contains("without sending a response"));
    assert_eq!(client.call(function_id("ok"), b"").unwrap(), b"ok");
}

struct Counter {
    hits: AtomicU64,
}

#[test]
fn test_method_handlers_track_receiver_lifetime() {
    let service = Arc::new(Counter {
        hits: AtomicU64::new(0),
    });
    let handlers = vec![
        HandlerDescriptor::method("hit", &service, |svc, _| {
            let n = svc.hits.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n.to_string().into_bytes())
        }),
        HandlerDescriptor::deferred_method("hit_later", &service, |svc, _, responder| {
            may::coroutine::sleep(Duration::from_millis(5));
            let n = svc.hits.fetch_add(1, Ordering::SeqCst) + 1;
            responder.ok(n.to_string());
        }),
    ];
    let fixture = TestServer::start(TesterConfig::default(), handlers);
    let mut client = fixture.client();

    assert_eq!(client.call(function_id("hit"), b"").unwrap(), b"1");
    assert_eq!(client.call(function_id("hit_later"), b"").unwrap(), b"2");
    // The deferred call may still hold its upgraded reference for a moment.
    assert!(common::eventually(Duration::from_secs(1), || {
        Arc::strong_count(&service) == 1
    }));

    drop(service);
    assert!(handler_failed(client.call(function_id("hit"), b"")).contains("dropped"));
    assert!(handler_failed(client.call(function_id("hit_later"), b"")).contains("dropped"));
}

#[derive(Serialize, Deserialize)]
struct Divide {
    numerator: i64,
    denominator: i64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Quotient {
    value: i64,
}

struct Greeter;

impl Handler for Greeter {
    type Request = String;
    type Response = String;

    fn handle(&self, req: TypedRequest<String>) -> Result<String, HandlerError> {
        Ok(format!("hello {} (seq {})", req.data, req.seq_num))
    }
}

#[test]
fn test_typed_handlers() {
    let handlers = vec![
        HandlerDescriptor::typed("divide", |args: Divide| {
            if args.denominator == 0 {
                return Err(HandlerError::new("division by zero"));
            }
            Ok(Quotient {
                value: args.numerator / args.denominator,
            })
        }),
        HandlerDescriptor::typed_deferred("double_later", |n: i64, responder| {
            may::coroutine::sleep(Duration::from_millis(5));
            responder.ok(n * 2);
        }),
        HandlerDescriptor::from_handler("greet", Greeter),
    ];
    let fixture = TestServer::start(TesterConfig::default(), handlers);
    let mut client = fixture.client();

    let args = encode_args(&Divide {
        numerator: 17,
        denominator: 5,
    })
    .unwrap();
    let body = client.call(function_id("divide"), &args).unwrap();
    assert_eq!(decode_body::<Quotient>(&body).unwrap(), Quotient { value: 3 });

    let args = encode_args(&Divide {
        numerator: 1,
        denominator: 0,
    })
    .unwrap();
    assert_eq!(
        handler_failed(client.call(function_id("divide"), &args)),
        "division by zero"
    );
    assert!(handler_failed(client.call(function_id("divide"), b"{}")).starts_with("invalid arguments"));

    let body = client
        .call(function_id("double_later"), &encode_args(&21i64).unwrap())
        .unwrap();
    assert_eq!(decode_body::<i64>(&body).unwrap(), 42);

    let body = client
        .call(function_id("greet"), &encode_args(&"ada").unwrap())
        .unwrap();
    assert!(decode_body::<String>(&body).unwrap().starts_with("hello ada (seq "));
}

#[test]
fn test_unregister_during_flight_finishes_inflight_call() {
    let slow = HandlerDescriptor::deferred("slow", |req, responder| {
        may::coroutine::sleep(Duration::from_millis(100));
        responder.ok(req.args);
    });
    let fixture = TestServer::start(TesterConfig::default(), vec![slow]);
    let mut client = fixture.client();

    client.send(function_id("slow"), b"in flight").unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(fixture.server.unregister_handler(function_id("slow")));

    assert_eq!(client.recv().unwrap(), b"in flight");
    let err = client.call(function_id("slow"), b"").unwrap_err();
    assert_eq!(err.rpc().unwrap().code, RpcErrorCode::FunctionNotSupported);
}

#[test]
fn test_registry_churn_under_live_traffic() {
    let fixture = TestServer::start(
        TesterConfig::default(),
        vec![HandlerDescriptor::immediate("stable", |req| Ok(req.args.clone()))],
    );

    let stop = Arc::new(AtomicBool::new(false));
    let churn = {
        let server = Arc::clone(&fixture.server);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut version = 0u64;
            while !stop.load(Ordering::Relaxed) {
                version += 1;
                let body = version.to_string().into_bytes();
                server.register_handler(HandlerDescriptor::immediate("flip", move |_| {
                    Ok(body.clone())
                }));
                if version % 2 == 0 {
                    server.unregister_handler(function_id("flip"));
                }
            }
            version
        })
    };

    let callers: Vec<_> = (0..4)
        .map(|t| {
            let mut client = fixture.client();
            thread::spawn(move || {
                for i in 0..200 {
                    let args = format!("{t}-{i}").into_bytes();
                    assert_eq!(client.call(function_id("stable"), &args).unwrap(), args);
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    assert!(churn.join().unwrap() > 0);
}

#[test]
fn test_replacing_a_handler_takes_effect_on_open_connections() {
    let fixture = TestServer::start(
        TesterConfig::default(),
        vec![HandlerDescriptor::immediate("version", |_| Ok(b"v1".to_vec()))],
    );
    let mut client = fixture.client();
    assert_eq!(client.call(function_id("version"), b"").unwrap(), b"v1");

    fixture
        .server
        .register_handler(HandlerDescriptor::immediate("version", |_| Ok(b"v2".to_vec())));
    assert_eq!(client.call(function_id("version"), b"").unwrap(), b"v2");
}
