// End-to-end calls against the reference native backend
use ffi_bridge::{
    AppInfo, AuthRequestInfo, BorrowedAuthResponse, Bridge, BridgeError, Event, Key, Reply,
};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sample_app() -> AppInfo {
    AppInfo::new(1234, "Unique-App", Key::new([1, 2, 3, 5, 7, 11, 13, 17]))
}

fn auth_info() -> AuthRequestInfo {
    AuthRequestInfo {
        app_id: "net.example.app".to_string(),
        app_name: "Example".to_string(),
        vendor: "Example Vendor".to_string(),
        needs_own_container: true,
        request_id: 42,
    }
}

#[test]
fn register_app_succeeds() {
    init_logging();
    let bridge = Bridge::default();
    let (tx, rx) = mpsc::channel();
    let call = bridge.register_app(&sample_app(), move |reply| tx.send(reply).unwrap()).unwrap();

    call.wait(TIMEOUT).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Ok(()));
}

#[test]
fn app_queries_echo_their_input() {
    let bridge = Bridge::default();
    let app = sample_app();

    let (tx, rx) = mpsc::channel();
    bridge.get_app_id(&app, move |reply| tx.send(reply).unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Ok(1234));

    let (tx, rx) = mpsc::channel();
    bridge.get_app_name(&app, move |reply| tx.send(reply).unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().unwrap(), "Unique-App");

    let (tx, rx) = mpsc::channel();
    bridge.get_app_key(&app, move |reply| tx.send(reply).unwrap()).unwrap();
    let key = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(key.as_bytes(), &[1, 2, 3, 5, 7, 11, 13, 17]);

    let (tx, rx) = mpsc::channel();
    bridge.get_app_info(&app, move |reply| tx.send(reply).unwrap()).unwrap();
    let (id, name, key) = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!((id, name.as_str(), key), (1234, "Unique-App", app.key));
}

#[test]
fn app_input_may_be_dropped_after_call() {
    let bridge = Bridge::default();
    let (tx, rx) = mpsc::channel();
    {
        let app = AppInfo::new(7, "short-lived", Key::filled(3));
        bridge.get_app_name(&app, move |reply| tx.send(reply).unwrap()).unwrap();
    }
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().unwrap(), "short-lived");
}

#[test]
fn generated_lists() {
    let bridge = Bridge::default();

    let (tx, rx) = mpsc::channel();
    bridge.random_numbers(move |reply| tx.send(reply).unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().unwrap(), vec![1, 1, 2, 3, 5, 8, 13, 21]);

    let (tx, rx) = mpsc::channel();
    bridge.random_keys(move |reply| tx.send(reply).unwrap()).unwrap();
    let keys = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(keys.len(), 5);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(*key, Key::filled(i as u8));
    }
}

#[test]
fn verify_signature_rejects_all_zero() {
    let bridge = Bridge::default();

    let (tx, rx) = mpsc::channel();
    bridge.verify_signature(&[0; 8], move |reply| tx.send(reply).unwrap()).unwrap();
    let err = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
    assert_eq!(err.native_code(), Some(-11));

    let (tx, rx) = mpsc::channel();
    bridge.verify_signature(&[], move |reply| tx.send(reply).unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().unwrap_err().native_code(), Some(-11));

    let (tx, rx) = mpsc::channel();
    bridge
        .verify_signature(&[1, 1, 1, 2, 1, 1, 2, 1], move |reply| tx.send(reply).unwrap())
        .unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Ok(()));
}

#[test]
fn verify_keys_accepts_any_list() {
    let bridge = Bridge::default();
    let keys = vec![Key::filled(1), Key::filled(2)];
    let (tx, rx) = mpsc::channel();
    bridge.verify_keys(&keys, move |reply| tx.send(reply).unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Ok(()));
}

#[test]
fn async_callback_fires_once_on_another_thread() {
    let bridge = Bridge::default();
    let caller = thread::current().id();
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = deliveries.clone();

    let call = bridge
        .with_string_async(move |reply| {
            sink.lock().unwrap().push((thread::current().id(), reply));
        })
        .unwrap();
    call.wait(TIMEOUT).unwrap();

    let deliveries = deliveries.lock().unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_ne!(deliveries[0].0, caller);
    assert_eq!(
        deliveries[0].1.as_deref(),
        Ok("Hello from a native worker thread")
    );
    assert!(!bridge.registry().is_registered(call.handles()[0]));
}

#[test]
fn sync_callback_runs_before_return() {
    let bridge = Bridge::default();
    let caller = thread::current().id();
    let (tx, rx) = mpsc::channel();

    let call = bridge
        .with_string(move |reply| tx.send((thread::current().id(), reply)).unwrap())
        .unwrap();

    assert!(call.is_settled());
    let (thread_id, reply) = rx.try_recv().unwrap();
    assert_eq!(thread_id, caller);
    assert_eq!(reply.unwrap(), "Hello from the native backend");
}

#[test]
fn create_account_connects_then_disconnects() {
    init_logging();
    let bridge = Bridge::default();
    let order = Arc::new(Mutex::new(Vec::new()));
    let (on_connect, on_disconnect) = (order.clone(), order.clone());

    let call = bridge
        .create_account(
            "locator",
            "password",
            move |reply: Reply<AppInfo>| {
                let app = reply.unwrap();
                on_connect.lock().unwrap().push(format!("connect {} {}", app.id, app.name));
            },
            move |reply: Reply<()>| {
                reply.unwrap();
                on_disconnect.lock().unwrap().push("disconnect".to_string());
            },
        )
        .unwrap();

    call.wait(TIMEOUT).unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["connect 5678 locator:password".to_string(), "disconnect".to_string()]
    );
    assert!(!bridge.registry().is_registered(call.handles()[0]));
}

#[test]
fn account_events_arrive_in_order() {
    init_logging();
    let bridge = Bridge::default();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let call = bridge
        .create_account_events("user", "secret", move |reply| {
            sink.lock().unwrap().push(reply.unwrap());
        })
        .unwrap();
    call.wait(TIMEOUT).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    match &events[0] {
        Event::Connected(app) => {
            assert_eq!(app.id, 91011);
            assert_eq!(app.name, "user:secret");
            assert_eq!(app.key, Key::new([15, 16, 18, 20, 21, 22, 24, 25]));
        }
        other => panic!("expected Connected first, got {:?}", other),
    }
    assert_eq!(events[1], Event::Disconnected);
}

#[test]
fn cancelled_account_stream_stops_delivering() {
    init_logging();
    let bridge = Bridge::default();
    let (tx, rx) = mpsc::channel();

    let call = bridge
        .create_account_events("user", "secret", move |reply| {
            let _ = tx.send(reply);
        })
        .unwrap();
    // Wait for the connect event, then cancel before the disconnect
    assert!(matches!(rx.recv_timeout(TIMEOUT).unwrap(), Ok(Event::Connected(_))));
    let handle = call.handles()[0];
    assert_eq!(call.cancel(), 1);
    assert!(!bridge.registry().is_registered(handle));
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
}

#[test]
fn auth_response_copied_inside_callback() {
    init_logging();
    let bridge = Bridge::default();
    let request = bridge.new_auth_request(&auth_info()).unwrap();
    let (tx, rx) = mpsc::channel();

    let call = bridge
        .on_auth_request(&request, move |reply| {
            let response = reply.unwrap();
            tx.send(response.to_owned()).unwrap();
        })
        .unwrap();
    // The backend copied the request, so it may go away before the callback
    request.release().unwrap();
    call.wait(TIMEOUT).unwrap();

    let response = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(response.original_request_id, 42);
    assert_eq!(
        response.message,
        "Granted authorisation to App with ID: net.example.app, Name: Example and vendor: \
         Example Vendor. Asked for exclusive App container: 1."
    );
    assert_eq!(bridge.tracker().live_count(), 0);
}

#[test]
#[should_panic(expected = "ownership violation")]
fn auth_response_used_after_callback_panics() {
    let bridge = Bridge::default();
    let request = bridge.new_auth_request(&auth_info()).unwrap();
    let stash: Arc<Mutex<Option<BorrowedAuthResponse>>> = Arc::new(Mutex::new(None));
    let slot = stash.clone();

    let call = bridge
        .on_auth_request(&request, move |reply| {
            *slot.lock().unwrap() = Some(reply.unwrap());
        })
        .unwrap();
    call.wait(TIMEOUT).unwrap();

    let escaped = stash.lock().unwrap().take().unwrap();
    assert!(!escaped.is_valid());
    assert!(matches!(escaped.try_message(), Err(BridgeError::UseAfterFree(_))));
    escaped.message();
}

#[test]
fn auth_request_double_free_detected() {
    let bridge = Bridge::default();
    let request = bridge.new_auth_request(&auth_info()).unwrap();
    let handle = request.handle().unwrap();

    bridge.tracker().release(handle).unwrap();
    assert!(!request.is_live());
    assert_eq!(request.release(), Err(BridgeError::DoubleFree(handle)));
}

#[test]
fn auth_request_with_nul_is_rejected() {
    let bridge = Bridge::default();
    let mut info = auth_info();
    info.vendor = "bad\0vendor".to_string();
    assert!(matches!(bridge.new_auth_request(&info), Err(BridgeError::Encode(_))));
}

#[test]
fn concurrent_calls_each_fire_once() {
    init_logging();
    let bridge = Arc::new(Bridge::default());
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let bridge = bridge.clone();
            thread::spawn(move || {
                let app = AppInfo::new(i, format!("app-{}", i), Key::filled(i as u8));
                let (tx, rx) = mpsc::channel();
                let call = bridge.get_app_id(&app, move |reply| tx.send(reply).unwrap()).unwrap();
                call.wait(TIMEOUT).unwrap();
                let ids: Vec<_> = rx.try_iter().collect();
                assert_eq!(ids, vec![Ok(i)]);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}
