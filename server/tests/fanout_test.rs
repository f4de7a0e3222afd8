//! Integration tests: real server on a random port, raw protocol clients.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};

use protocol::{ChatCodec, ChatMessage};
use server::registry::Registry;
use server::server_types::{SERVER_SENDER_ID, SHUTDOWN_TEXT};
use server::{Config, ServerError, ServerListener};

type Reader = FramedRead<OwnedReadHalf, ChatCodec>;
type Writer = FramedWrite<OwnedWriteHalf, ChatCodec>;

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(250);

struct TestServer {
    addr: SocketAddr,
    registry: Registry,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        timeout(WAIT, self.task).await.expect("server did not stop").expect("server task panicked")
    }
}

/// Helper: start the server on a random port.
async fn start_server(config: Config) -> TestServer {
    let config = Config { bind: "127.0.0.1".to_owned(), port: 0, ..config };
    let listener = ServerListener::bind(config).await.expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    let registry = listener.registry();

    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(listener.run(async move {
        let _ = rx.await;
    }));

    TestServer { addr, registry, shutdown: Some(tx), task }
}

async fn connect(addr: SocketAddr) -> (Reader, Writer) {
    let stream = TcpStream::connect(addr).await.expect("Failed to connect");
    let (r, w) = stream.into_split();
    (FramedRead::new(r, ChatCodec::default()), FramedWrite::new(w, ChatCodec::default()))
}

/// Registration happens on the server's worker, poll until it caught up.
async fn wait_for_len(registry: &Registry, n: usize) {
    timeout(WAIT, async {
        while registry.len().await != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never reached {} connections", n));
}

async fn next_msg(r: &mut Reader) -> ChatMessage {
    timeout(WAIT, r.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .expect("undecodable frame")
}

async fn expect_silence(r: &mut Reader) {
    assert!(timeout(QUIET, r.next()).await.is_err(), "unexpected frame");
}

async fn expect_closed(r: &mut Reader) {
    let end = timeout(WAIT, r.next()).await.expect("connection was not closed");
    assert!(end.is_none() || matches!(end, Some(Err(_))));
}

fn msg(sender: &str, text: &str) -> ChatMessage {
    ChatMessage::new(sender, format!("user {}", sender), text, None)
}

#[tokio::test]
async fn three_clients_fan_out_without_echo() {
    let server = start_server(Config::default()).await;
    let (mut ra, mut wa) = connect(server.addr).await;
    let (mut rb, mut wb) = connect(server.addr).await;
    let (mut rc, mut wc) = connect(server.addr).await;
    wait_for_len(&server.registry, 3).await;

    // first frames are ordinary messages, typically a joined event
    wa.send(ChatMessage::joined("A", "anna", Some("/img/a.png".to_owned()))).await.unwrap();
    let joined = next_msg(&mut rb).await;
    assert_eq!(joined.text(), "joined");
    assert_eq!(joined.photo_reference(), Some("/img/a.png"));
    assert_eq!(next_msg(&mut rc).await, joined);

    wb.send(ChatMessage::joined("B", "bohdan", None)).await.unwrap();
    assert_eq!(next_msg(&mut ra).await.sender_id(), "B");
    assert_eq!(next_msg(&mut rc).await.sender_id(), "B");

    wc.send(ChatMessage::joined("C", "chrystia", None)).await.unwrap();
    assert_eq!(next_msg(&mut ra).await.sender_id(), "C");
    assert_eq!(next_msg(&mut rb).await.sender_id(), "C");

    let hello = msg("A", "hello everyone");
    wa.send(&hello).await.unwrap();
    assert_eq!(next_msg(&mut rb).await, hello);
    assert_eq!(next_msg(&mut rc).await, hello);
    expect_silence(&mut ra).await;

    server.stop().await.unwrap();
}

#[tokio::test]
async fn echo_mode_delivers_back_to_sender() {
    let server = start_server(Config { echo: true, ..Config::default() }).await;
    let (mut ra, mut wa) = connect(server.addr).await;
    let (mut rb, _wb) = connect(server.addr).await;
    wait_for_len(&server.registry, 2).await;

    let m = msg("A", "me too");
    wa.send(&m).await.unwrap();
    assert_eq!(next_msg(&mut ra).await, m);
    assert_eq!(next_msg(&mut rb).await, m);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn abrupt_disconnect_leaves_others_untouched() {
    let server = start_server(Config::default()).await;
    let (_ra, mut wa) = connect(server.addr).await;
    let (rb, wb) = connect(server.addr).await;
    let (mut rc, _wc) = connect(server.addr).await;
    wait_for_len(&server.registry, 3).await;

    // B vanishes without a left event
    drop(rb);
    drop(wb);

    let m = msg("A", "anyone there?");
    wa.send(&m).await.unwrap();
    assert_eq!(next_msg(&mut rc).await, m);

    // and once things settle B is gone from the registry
    wait_for_len(&server.registry, 2).await;

    let again = msg("A", "still here");
    wa.send(&again).await.unwrap();
    assert_eq!(next_msg(&mut rc).await, again);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_lose_nothing() {
    const PER_SENDER: usize = 25;

    let server = start_server(Config::default()).await;
    let (mut ra, mut wa) = connect(server.addr).await;
    let (mut rb, mut wb) = connect(server.addr).await;
    let (mut rc, _wc) = connect(server.addr).await;
    wait_for_len(&server.registry, 3).await;

    let send_a = async {
        for i in 0..PER_SENDER {
            wa.send(msg("A", &i.to_string())).await.unwrap();
        }
    };
    let send_b = async {
        for i in 0..PER_SENDER {
            wb.send(msg("B", &i.to_string())).await.unwrap();
        }
    };
    tokio::join!(send_a, send_b);

    // C sees both streams, each one in the order it was sent
    let (mut from_a, mut from_b) = (vec![], vec![]);
    for _ in 0..PER_SENDER * 2 {
        let m = next_msg(&mut rc).await;
        match m.sender_id() {
            "A" => from_a.push(m.text().to_owned()),
            "B" => from_b.push(m.text().to_owned()),
            other => panic!("unexpected sender {}", other),
        }
    }
    let expected: Vec<String> = (0..PER_SENDER).map(|i| i.to_string()).collect();
    assert_eq!(from_a, expected);
    assert_eq!(from_b, expected);

    // the senders each see only the other one
    for i in 0..PER_SENDER {
        assert_eq!(next_msg(&mut ra).await, msg("B", &i.to_string()));
        assert_eq!(next_msg(&mut rb).await, msg("A", &i.to_string()));
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn fragmented_frames_are_reassembled() {
    let server = start_server(Config::default()).await;
    let (_ra, wa) = connect(server.addr).await;
    let (mut rb, _wb) = connect(server.addr).await;
    wait_for_len(&server.registry, 2).await;

    let first = ChatMessage::new("A", "anna", "", None);
    let second = ChatMessage::new("A", "anna", "фото", Some("/images/x.jpg".to_owned()));
    let mut bytes = protocol::encode(&first).unwrap().to_vec();
    bytes.extend_from_slice(&protocol::encode(&second).unwrap());

    // one byte per write, with pauses so the server sees them separately
    let mut raw = wa.into_inner();
    for b in bytes {
        raw.write_all(&[b]).await.unwrap();
        raw.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(next_msg(&mut rb).await, first);
    assert_eq!(next_msg(&mut rb).await, second);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_frame_closes_only_that_connection() {
    let server = start_server(Config { max_field_len: 1024, ..Config::default() }).await;
    let (_ra, mut wa) = connect(server.addr).await;
    let (mut rb, _wb) = connect(server.addr).await;
    let (mut rc, wc) = connect(server.addr).await;
    wait_for_len(&server.registry, 3).await;

    // a length field far beyond the maximum
    let mut raw = wc.into_inner();
    raw.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

    expect_closed(&mut rc).await;
    wait_for_len(&server.registry, 2).await;

    let m = msg("A", "unaffected");
    wa.send(&m).await.unwrap();
    assert_eq!(next_msg(&mut rb).await, m);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn excess_connections_are_closed_without_frames() {
    let server = start_server(Config { max_connections: 2, ..Config::default() }).await;
    let (mut ra, mut wa) = connect(server.addr).await;
    let (rb, wb) = connect(server.addr).await;
    wait_for_len(&server.registry, 2).await;

    let (mut rx, _wx) = connect(server.addr).await;
    expect_closed(&mut rx).await;
    assert_eq!(server.registry.len().await, 2);

    // a slot frees up once someone leaves
    drop(rb);
    drop(wb);
    wait_for_len(&server.registry, 1).await;
    let (mut rd, _wd) = connect(server.addr).await;
    wait_for_len(&server.registry, 2).await;

    let m = msg("A", "welcome");
    wa.send(&m).await.unwrap();
    assert_eq!(next_msg(&mut rd).await, m);
    expect_silence(&mut ra).await;

    server.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_notifies_then_closes_everyone() {
    let server = start_server(Config::default()).await;
    let (mut ra, _wa) = connect(server.addr).await;
    let (mut rb, _wb) = connect(server.addr).await;
    wait_for_len(&server.registry, 2).await;

    let registry = server.registry.clone();
    server.stop().await.unwrap();

    for r in [&mut ra, &mut rb] {
        let notice = next_msg(r).await;
        assert_eq!(notice.sender_id(), SERVER_SENDER_ID);
        assert_eq!(notice.text(), SHUTDOWN_TEXT);
        expect_closed(r).await;
    }
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let config = Config { bind: "127.0.0.1".to_owned(), port, ..Config::default() };
    match ServerListener::bind(config).await {
        Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{}", port)),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("bound to a port already in use"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_reader_is_dropped_without_holding_up_others() {
    const COUNT: usize = 200;
    const BODY_LEN: usize = 60_000;

    let server = start_server(Config { write_timeout_ms: 200, ..Config::default() }).await;
    let (_ra, mut wa) = connect(server.addr).await;
    let (mut rc, _wc) = connect(server.addr).await;
    // never reads, once its socket buffers fill every write to it stalls
    let (_rs, _ws) = connect(server.addr).await;
    wait_for_len(&server.registry, 3).await;

    let reader = tokio::spawn(async move {
        for _ in 0..COUNT {
            assert_eq!(next_msg(&mut rc).await.text().len(), BODY_LEN);
        }
    });

    let started = Instant::now();
    let body = "x".repeat(BODY_LEN);
    for _ in 0..COUNT {
        wa.send(msg("A", &body)).await.unwrap();
    }
    timeout(WAIT, reader).await.expect("reader fell behind").unwrap();

    // a single write timeout is paid, not one per message
    assert!(started.elapsed() < WAIT, "took {:?}", started.elapsed());
    wait_for_len(&server.registry, 2).await;

    server.stop().await.unwrap();
}
