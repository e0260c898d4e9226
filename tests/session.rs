use approx::assert_abs_diff_eq;
use std::net::TcpListener;
use std::thread;
use std::time::Duration;
use toy_he_graph::protocol::{SessionError, SessionState};
use toy_he_graph::{
    CkksParams, ElementType, Graph, OpKind, ServerSession, Session, SessionConfig,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Serves one client: evaluates `graph` on its input and returns the
/// number of rescales in the compiled graph.
fn serve(listener: TcpListener, graph: Graph, config: SessionConfig) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let (mut session, backend, input) =
            ServerSession::accept(&listener, CkksParams::toy(), &config).unwrap();
        let compiled = backend.compile(graph).unwrap();
        let out = backend.call(&compiled, &[input], &mut session).unwrap();
        session.send_result(&out[0]).unwrap();
        compiled.count_ops(OpKind::Rescale)
    })
}

fn bind() -> (TcpListener, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[test]
fn bounded_relu_round_trip() {
    init();
    let mut g = Graph::new();
    let x = g.parameter(ElementType::F32, vec![6]);
    let w = g
        .constant(ElementType::F32, vec![6], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        .unwrap();
    let alpha = g.constant(ElementType::F32, vec![6], vec![4.0; 6]).unwrap();
    let m = g.multiply(x, w).unwrap();
    let r = g.relu(m).unwrap();
    let y = g.minimum(r, alpha).unwrap();
    g.add_result(y).unwrap();

    let (listener, addr) = bind();
    let config = SessionConfig::default().with_seed(11);
    let server = serve(listener, g, config.clone());

    let inputs = vec![-2.0, -1.0, 0.0, 1.0, 2.0, 3.0];
    let mut client = Session::connect(addr, inputs, vec![6], config).unwrap();
    let result = client.run().unwrap();
    assert_eq!(client.state(), SessionState::Done);
    for (got, want) in result.iter().zip([0.0, 0.0, 0.0, 4.0, 4.0, 4.0]) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-3);
    }
    assert_eq!(server.join().unwrap(), 1);
}

#[test]
fn relu_requests_are_chunked() {
    init();
    let mut g = Graph::new();
    let x = g.parameter(ElementType::F32, vec![6]);
    let r = g.relu(x).unwrap();
    g.add_result(r).unwrap();

    let (listener, addr) = bind();
    let config = SessionConfig::default()
        .with_seed(12)
        .with_max_batch_elements(4);
    let server = serve(listener, g, config.clone());

    let inputs = vec![-2.0, -1.0, 0.0, 1.0, 2.0, 3.0];
    let result = Session::connect(addr, inputs, vec![6], config)
        .unwrap()
        .run()
        .unwrap();
    for (got, want) in result.iter().zip([0.0, 0.0, 0.0, 1.0, 2.0, 3.0]) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-3);
    }
    assert_eq!(server.join().unwrap(), 0);
}

#[test]
fn batched_complex_packing_session() {
    init();
    let mut g = Graph::new();
    let x = g.parameter(ElementType::F32, vec![4, 3]);
    let r = g.relu(x).unwrap();
    g.add_result(r).unwrap();

    let (listener, addr) = bind();
    let config = SessionConfig::default()
        .with_seed(13)
        .with_batch_size(4)
        .with_complex_packing(true);
    let server = serve(listener, g, config.clone());

    let inputs: Vec<f64> = (0..12).map(|i: i32| f64::from(i) - 5.5).collect();
    let result = Session::connect(addr, inputs.clone(), vec![4, 3], config)
        .unwrap()
        .run()
        .unwrap();
    for (got, x) in result.iter().zip(&inputs) {
        assert_abs_diff_eq!(*got, x.max(0.0), epsilon = 1e-3);
    }
    server.join().unwrap();
}

#[test]
fn silent_server_times_out() {
    init();
    let (listener, addr) = bind();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    let config = SessionConfig::default().with_timeout(Duration::from_millis(100));
    let mut client = Session::connect(addr, vec![1.0], vec![1], config).unwrap();
    assert!(matches!(client.run(), Err(SessionError::Timeout(_))));
    assert_eq!(client.state(), SessionState::Done);
    assert!(client.result().is_none());
    server.join().unwrap();
}

#[test]
fn client_disconnect_fails_the_server() {
    init();
    let (listener, addr) = bind();
    let config = SessionConfig::default().with_timeout(Duration::from_secs(5));
    let server_config = config.clone();
    let server = thread::spawn(move || {
        ServerSession::accept(&listener, CkksParams::toy(), &server_config).err()
    });

    let client = Session::connect(addr, vec![1.0], vec![1], config).unwrap();
    drop(client);
    let err = server.join().unwrap();
    assert!(matches!(err, Some(SessionError::Closed)));
}
