//! Wire-level exercises of the daemon: a blocking client speaking the frame
//! protocol against a served `TcpListener`.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use tempfile::TempDir;
use tether_proto::{frame_sync, Request, Response};
use tether_server::{serve, ServerState};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

fn start(state: Arc<ServerState>) -> (Runtime, SocketAddr) {
    let rt = Runtime::new().unwrap();
    let listener = rt.block_on(async { TcpListener::bind("127.0.0.1:0").await.unwrap() });
    let addr = listener.local_addr().unwrap();
    rt.spawn(serve(listener, state));
    (rt, addr)
}

fn exchange(stream: &mut TcpStream, request: &Request) -> Response {
    let seq_id = frame_sync::send_request(stream, request).unwrap();
    let (header, response) = frame_sync::read_response(stream).unwrap();
    assert_eq!(header.seq_id, seq_id);
    response
}

#[test]
fn ping_answers_ack() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(ServerState::with_verifier(dir.path(), "42"));
    let (_rt, addr) = start(state);

    let mut stream = TcpStream::connect(addr).unwrap();
    match exchange(&mut stream, &Request::Ping) {
        Response::Pong { message } => assert_eq!(message, "Ack"),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn connection_serves_multiple_requests() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("f"), b"hello").unwrap();
    let state = Arc::new(ServerState::with_verifier(dir.path(), "42"));
    let (_rt, addr) = start(state);

    let mut stream = TcpStream::connect(addr).unwrap();
    for _ in 0..3 {
        match exchange(
            &mut stream,
            &Request::Getattr {
                path: "/f".to_string(),
            },
        ) {
            Response::Attr(attr) => assert_eq!(attr.size, 5),
            other => panic!("unexpected: {:?}", other),
        }
    }
}

#[test]
fn buffered_writes_commit_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(ServerState::with_verifier(dir.path(), "42"));
    let (_rt, addr) = start(state);

    let mut stream = TcpStream::connect(addr).unwrap();

    match exchange(
        &mut stream,
        &Request::Create {
            path: "/f".to_string(),
            mode: 0o644,
        },
    ) {
        Response::Done => {}
        other => panic!("unexpected: {:?}", other),
    }

    for (offset, data) in [(0u64, b"AAAA"), (4u64, b"BBBB")] {
        match exchange(
            &mut stream,
            &Request::Write {
                path: "/f".to_string(),
                offset,
                data: data.to_vec(),
            },
        ) {
            Response::Written {
                bytes_written,
                write_verifier,
            } => {
                assert_eq!(bytes_written, 4);
                assert_eq!(write_verifier, "42");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    match exchange(
        &mut stream,
        &Request::Commit {
            path: "/f".to_string(),
            flags: libc::O_WRONLY,
            write_verifiers: vec!["42".to_string()],
        },
    ) {
        Response::Committed {
            current_write_verifier,
        } => assert_eq!(current_write_verifier, "42"),
        other => panic!("unexpected: {:?}", other),
    }

    assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"AAAABBBB");
}

#[test]
fn stale_verifier_is_rejected_over_the_wire() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("f"), b"keep").unwrap();
    let state = Arc::new(ServerState::with_verifier(dir.path(), "42"));
    let (_rt, addr) = start(state);

    let mut stream = TcpStream::connect(addr).unwrap();
    exchange(
        &mut stream,
        &Request::Write {
            path: "/f".to_string(),
            offset: 0,
            data: b"XXXX".to_vec(),
        },
    );

    match exchange(
        &mut stream,
        &Request::Commit {
            path: "/f".to_string(),
            flags: libc::O_WRONLY,
            write_verifiers: vec!["41".to_string()],
        },
    ) {
        Response::Error(e) => {
            assert_eq!(e.errno, libc::EIO);
            assert_eq!(e.verifier.as_deref(), Some("42"));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"keep");
}
