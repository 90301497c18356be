//! Wire-level exchanges driven over in-memory transports.

use morsel::{BufStream, ErrorKind, Transaction};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

async fn transaction_for(request: &[u8]) -> (DuplexStream, Transaction<DuplexStream>) {
    let (mut client, server) = duplex(64 * 1024);
    client.write_all(request).await.unwrap();
    let tx = Transaction::create(BufStream::new(server)).await.unwrap();
    (client, tx)
}

async fn wire_of(mut client: DuplexStream) -> String {
    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();
    String::from_utf8(wire).unwrap()
}

fn head_and_body(wire: &str) -> (&str, &str) {
    wire.split_once("\r\n\r\n").expect("complete head")
}

/// Read the request body until the reader reports end-of-stream.
async fn read_body(tx: &mut Transaction<DuplexStream>) -> Vec<u8> {
    let mut body = Vec::new();
    let mut buf = [0u8; 7];
    loop {
        match tx.read_some(&mut buf).await {
            Ok(n) => body.extend_from_slice(&buf[..n]),
            Err(err) if err.is_eof() => return body,
            Err(err) => panic!("body read failed: {err}"),
        }
    }
}

#[tokio::test]
async fn get_with_chunked_response() {
    let (client, mut tx) = transaction_for(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n").await;

    assert_eq!(tx.request().method(), "GET");
    assert_eq!(tx.request().version(), "HTTP/1.1");
    assert_eq!(tx.request().path(), "/");
    assert_eq!(tx.request().headers().get("host"), Some("h"));

    // A zero-length read is a no-op, not end-of-stream.
    let mut empty = [0u8; 0];
    assert_eq!(tx.read_some(&mut empty).await.unwrap(), 0);

    tx.set_status(200);
    tx.write_some(b"ok").await.unwrap();
    tx.finish().await.unwrap();
    assert!(tx.keep_alive());
    drop(tx);

    let wire = wire_of(client).await;
    let (head, body) = head_and_body(&wire);
    assert_eq!(body, "2\r\nok\r\n0\r\n\r\n");

    let lines: Vec<&str> = head.lines().collect();
    assert_eq!(lines[0], "HTTP/1.1 200 OK");
    assert!(lines.contains(&"Transfer-Encoding: chunked"));
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("Date: ") && l.ends_with(" GMT")),
        "missing Date header in {head:?}"
    );
    assert_eq!(lines.len(), 3);
}

#[tokio::test]
async fn post_with_content_length_and_bodyless_204() {
    let (client, mut tx) =
        transaction_for(b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello").await;

    assert_eq!(tx.request().body_remaining(), 5);
    let body = read_body(&mut tx).await;
    assert_eq!(body, b"hello");

    tx.set_status(204);
    tx.finish().await.unwrap();
    assert!(tx.keep_alive());
    drop(tx);

    let wire = wire_of(client).await;
    let (head, body) = head_and_body(&wire);
    assert_eq!(body, "");
    let lines: Vec<&str> = head.lines().collect();
    assert_eq!(lines[0], "HTTP/1.1 204 No Content");
    assert!(!head.contains("Transfer-Encoding"));
    assert!(!head.contains("Content-Length"));
}

#[tokio::test]
async fn chunked_request_reassembles() {
    let (_client, mut tx) = transaction_for(
        b"POST /in HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    )
    .await;

    let body = read_body(&mut tx).await;
    assert_eq!(body, b"hello world");

    // The end-of-stream signal repeats.
    let mut buf = [0u8; 4];
    assert!(tx.read_some(&mut buf).await.unwrap_err().is_eof());
}

#[tokio::test]
async fn chunk_extensions_are_ignored() {
    let (_client, mut tx) = transaction_for(
        b"POST /in HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
          5;name=value\r\nhello\r\n0\r\n\r\n",
    )
    .await;
    assert_eq!(read_body(&mut tx).await, b"hello");
}

#[tokio::test]
async fn trailers_fold_into_request_headers() {
    let (_client, mut tx) = transaction_for(
        b"POST /in HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n0\r\nX-Tag: v\r\n\r\n",
    )
    .await;

    assert_eq!(tx.request().headers().get("x-tag"), None);
    let body = read_body(&mut tx).await;
    assert_eq!(body, b"hello");
    assert_eq!(tx.request().headers().get("x-tag"), Some("v"));
    assert_eq!(tx.request().headers().get("X-Tag"), Some("v"));
}

#[tokio::test]
async fn head_parse_failures_are_fatal() {
    let cases: [(&[u8], fn(&ErrorKind) -> bool); 4] = [
        (b"FOO / HTTP/1.1\r\n\r\n", |k| {
            matches!(k, ErrorKind::InvalidRequestLine)
        }),
        (b"GET / HTTP/1.0\r\n\r\n", |k| {
            matches!(k, ErrorKind::UnsupportedHttpVersion)
        }),
        (b"GET / HTTP/1.1\r\nbroken header\r\n\r\n", |k| {
            matches!(k, ErrorKind::InvalidRequestHeader)
        }),
        (b"POST / HTTP/1.1\r\nContent-Length: nope\r\n\r\n", |k| {
            matches!(k, ErrorKind::InvalidContentLength)
        }),
    ];

    for (request, expected) in cases {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(request).await.unwrap();
        let err = Transaction::create(BufStream::new(server))
            .await
            .err()
            .expect("head must be rejected");
        assert!(expected(err.kind()), "unexpected error {err} for {request:?}");
        assert!(err.is_parse());
    }
}

#[tokio::test]
async fn invalid_chunk_size_is_rejected_eagerly() {
    let (mut client, server) = duplex(64 * 1024);
    client
        .write_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
        .await
        .unwrap();
    let err = Transaction::create(BufStream::new(server)).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidChunkLength));
}

#[tokio::test]
async fn missing_chunk_delimiter_is_rejected() {
    let (_client, mut tx) = transaction_for(
        b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhelloXX\r\n0\r\n\r\n",
    )
    .await;

    let mut buf = [0u8; 16];
    let err = tx.read_some(&mut buf).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidChunkDelimiter));
}

#[tokio::test]
async fn identity_response_round_trips() {
    let (client, mut tx) = transaction_for(b"GET /id HTTP/1.1\r\n\r\n").await;

    tx.set_status(200);
    tx.response_headers_mut().insert("Content-Length", "5");
    tx.write_some(b"he").await.unwrap();
    tx.write_some(b"llo").await.unwrap();
    tx.finish().await.unwrap();
    assert!(!tx.is_chunked());
    assert_eq!(tx.bytes_written(), 5);
    drop(tx);

    let wire = wire_of(client).await;
    let (head, body) = head_and_body(&wire);
    assert_eq!(body, "hello");
    assert!(head.contains("Content-Length: 5"));
    assert!(!head.contains("Transfer-Encoding"));
    // Exactly one status line and header block per response.
    assert_eq!(wire.matches("HTTP/1.1 ").count(), 1);
}

#[tokio::test]
async fn empty_response_gets_content_length_zero() {
    let (client, mut tx) = transaction_for(b"GET / HTTP/1.1\r\n\r\n").await;
    tx.set_status(200);
    tx.finish().await.unwrap();
    drop(tx);

    let wire = wire_of(client).await;
    let (head, body) = head_and_body(&wire);
    assert_eq!(body, "");
    assert!(head.contains("Content-Length: 0"));
    assert!(!head.contains("Transfer-Encoding"));
}

#[tokio::test]
async fn handler_transfer_encoding_wins_over_content_length() {
    let (client, mut tx) = transaction_for(b"GET / HTTP/1.1\r\n\r\n").await;
    tx.set_status(200);
    tx.response_headers_mut().insert("Content-Length", "999");
    tx.response_headers_mut().insert("Transfer-Encoding", "chunked");
    tx.write_some(b"abc").await.unwrap();
    tx.finish().await.unwrap();
    assert!(tx.is_chunked());
    drop(tx);

    let wire = wire_of(client).await;
    let (head, body) = head_and_body(&wire);
    assert!(!head.contains("Content-Length"));
    assert_eq!(body, "3\r\nabc\r\n0\r\n\r\n");
}

#[tokio::test]
async fn response_trailers_follow_the_terminator() {
    let (client, mut tx) = transaction_for(b"GET / HTTP/1.1\r\n\r\n").await;
    tx.set_status(200);
    tx.trailers_mut().insert("X-Digest", "abc123");
    tx.write_some(b"payload").await.unwrap();
    tx.finish().await.unwrap();
    drop(tx);

    let wire = wire_of(client).await;
    let (_, body) = head_and_body(&wire);
    assert_eq!(body, "7\r\npayload\r\n0\r\nX-Digest: abc123\r\n\r\n");
}

#[tokio::test]
async fn head_requests_are_bodyless() {
    let (client, mut tx) = transaction_for(b"HEAD /x HTTP/1.1\r\n\r\n").await;
    tx.set_status(200);
    tx.response_headers_mut().insert("Content-Length", "5");

    let err = tx.write_some(b"x").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Io(_)));

    tx.finish().await.unwrap();
    drop(tx);

    let wire = wire_of(client).await;
    let (head, body) = head_and_body(&wire);
    assert_eq!(body, "");
    assert!(head.contains("Content-Length: 5"));
    assert!(!head.contains("Transfer-Encoding"));
}

#[tokio::test]
async fn informational_then_real_response() {
    let (client, mut tx) = transaction_for(b"GET / HTTP/1.1\r\n\r\n").await;

    tx.set_status(100);
    tx.finish().await.unwrap();

    tx.set_status(200);
    tx.write_some(b"ok").await.unwrap();
    tx.finish().await.unwrap();
    drop(tx);

    let wire = wire_of(client).await;
    assert!(wire.starts_with("HTTP/1.1 100 Continue\r\n"));
    assert!(wire.contains("HTTP/1.1 200 OK\r\n"));
    assert!(wire.ends_with("2\r\nok\r\n0\r\n\r\n"));
    assert_eq!(wire.matches("HTTP/1.1 ").count(), 2);
}

#[tokio::test]
async fn keep_alive_serves_back_to_back_requests() {
    let (mut client, server) = duplex(64 * 1024);
    client
        .write_all(
            b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello\
              GET /b HTTP/1.1\r\nHost: h\r\n\r\n",
        )
        .await
        .unwrap();

    // First handler never reads its body; finish must drain it.
    let mut tx = Transaction::create(BufStream::new(server)).await.unwrap();
    assert_eq!(tx.request().path(), "/a");
    tx.set_status(200);
    tx.write_some(b"first").await.unwrap();
    tx.finish().await.unwrap();
    assert!(tx.keep_alive());

    let mut tx = Transaction::create(tx.into_stream()).await.unwrap();
    assert_eq!(tx.request().path(), "/b");
    tx.set_status(204);
    tx.finish().await.unwrap();
    drop(tx);

    let wire = wire_of(client).await;
    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(wire.contains("5\r\nfirst\r\n0\r\n\r\n"));
    assert!(wire.contains("HTTP/1.1 204 No Content\r\n"));
}

#[tokio::test]
async fn overread_bytes_survive_via_putback() {
    // The head parser over-reads straight through the chunked body, its
    // trailers, and the next request; finish must put the surplus back.
    let (mut client, server) = duplex(64 * 1024);
    client
        .write_all(
            b"POST /a HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              3\r\nabc\r\n0\r\nX-T: 1\r\n\r\n\
              GET /next HTTP/1.1\r\nHost: h\r\n\r\n",
        )
        .await
        .unwrap();

    let mut tx = Transaction::create(BufStream::new(server)).await.unwrap();
    assert_eq!(read_body(&mut tx).await, b"abc");
    assert_eq!(tx.request().headers().get("x-t"), Some("1"));
    tx.set_status(204);
    tx.finish().await.unwrap();
    assert!(tx.keep_alive());

    let tx = Transaction::create(tx.into_stream()).await.unwrap();
    assert_eq!(tx.request().path(), "/next");
    assert_eq!(tx.request().headers().get("host"), Some("h"));
}

#[tokio::test]
async fn connection_close_disables_keep_alive() {
    let (_client, mut tx) =
        transaction_for(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    tx.set_status(200);
    assert!(!tx.keep_alive());

    let (_client, mut tx) = transaction_for(b"GET / HTTP/1.1\r\n\r\n").await;
    tx.set_status(200);
    tx.response_headers_mut().insert("Connection", "close");
    assert!(!tx.keep_alive());

    let (_client, mut tx) = transaction_for(b"GET / HTTP/1.1\r\n\r\n").await;
    tx.set_status(101);
    assert!(!tx.keep_alive());
}

#[tokio::test]
async fn query_and_fragment_are_decoded() {
    let (_client, tx) =
        transaction_for(b"GET /p%20q?a=1&b=x+y&bare&c=%2F#frag HTTP/1.1\r\n\r\n").await;
    let request = tx.request();
    assert_eq!(request.resource(), "/p%20q?a=1&b=x+y&bare&c=%2F#frag");
    assert_eq!(request.path(), "/p q");
    assert_eq!(request.query().get("a").map(String::as_str), Some("1"));
    assert_eq!(request.query().get("b").map(String::as_str), Some("x y"));
    assert_eq!(request.query().get("c").map(String::as_str), Some("/"));
    assert_eq!(request.query().get("bare"), None);
    assert_eq!(request.fragment(), "frag");
}

#[tokio::test]
async fn duplicate_wire_headers_coalesce() {
    let (_client, tx) =
        transaction_for(b"GET / HTTP/1.1\r\nH: a\r\nh: b\r\n\r\n").await;
    assert_eq!(tx.request().headers().get("H"), Some("a, b"));
    assert_eq!(tx.request().headers().get("h"), Some("a, b"));
}

#[test]
fn blocking_surface_round_trips() {
    let (mut client, server) = duplex(64 * 1024);
    morsel::blocking::block_on(client.write_all(b"GET /b HTTP/1.1\r\n\r\n")).unwrap();

    let mut tx = Transaction::create_blocking(BufStream::new(server)).unwrap();
    assert_eq!(tx.request().path(), "/b");
    tx.set_status(200);
    tx.write_some_blocking(b"ok").unwrap();
    tx.finish_blocking().unwrap();
    drop(tx);

    let mut wire = Vec::new();
    morsel::blocking::block_on(client.read_to_end(&mut wire)).unwrap();
    let wire = String::from_utf8(wire).unwrap();
    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(wire.ends_with("2\r\nok\r\n0\r\n\r\n"));
}
