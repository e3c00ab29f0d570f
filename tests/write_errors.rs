//! Failures inside the write handler sequence reach the error chain and
//! keep the faulty payload off the wire without disturbing later writes.

use std::sync::Arc;

use tokio::{
    io::AsyncReadExt,
    net::TcpStream,
    sync::mpsc,
    time::{Duration, timeout},
};
use wirechain::{
    BoxError, Capabilities, Error, Handler, Payload, SessionContext, SessionHandle, TcpServer,
};

/// Hands each new session's handle to the test body.
struct HandleTap {
    handles: mpsc::UnboundedSender<SessionHandle>,
}

#[async_trait::async_trait]
impl Handler for HandleTap {
    fn capabilities(&self) -> Capabilities { Capabilities::CONNECT }

    async fn on_connect(&self, ctx: &mut SessionContext) -> Result<(), BoxError> {
        let _ = self.handles.send(ctx.handle());
        Ok(())
    }
}

/// Rejects the marker payload on the outbound path and reports every error
/// routed to the session.
struct Gate {
    errors: mpsc::UnboundedSender<String>,
}

#[async_trait::async_trait]
impl Handler for Gate {
    fn capabilities(&self) -> Capabilities { Capabilities::WRITE | Capabilities::ERROR }

    async fn on_write(
        &self,
        _ctx: &mut SessionContext,
        output: Payload,
    ) -> Result<Payload, BoxError> {
        if let Payload::Bytes(bytes) = &output {
            if bytes.as_ref() == b"bad" {
                return Err("rejected payload".into());
            }
        }
        Ok(output)
    }

    async fn on_error(&self, _ctx: &mut SessionContext, error: &Error) {
        let _ = self.errors.send(error.to_string());
    }
}

async fn start_gated_server() -> (TcpServer, mpsc::UnboundedReceiver<SessionHandle>, mpsc::UnboundedReceiver<String>) {
    let (handles_tx, handles_rx) = mpsc::unbounded_channel();
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    let mut server = TcpServer::new();
    server.set_address("127.0.0.1:0");
    server
        .add_handler(Arc::new(HandleTap { handles: handles_tx }))
        .expect("tap declares CONNECT");
    server
        .add_handler(Arc::new(Gate { errors: errors_tx }))
        .expect("gate declares WRITE and ERROR");
    server.start().await.expect("bind ephemeral port");
    (server, handles_rx, errors_rx)
}

#[tokio::test]
async fn rejected_write_reaches_error_chain_and_skips_the_wire() {
    let (mut server, mut handles_rx, mut errors_rx) = start_gated_server().await;
    let addr = server.local_addr().expect("server is running");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let session = handles_rx.recv().await.expect("session handle");

    session.write(b"bad".to_vec()).await.expect("queue rejected payload");
    session.write(b"good".to_vec()).await.expect("queue accepted payload");

    let message = timeout(Duration::from_secs(5), errors_rx.recv())
        .await
        .expect("rejection reported")
        .expect("error chain ran");
    assert!(message.contains("rejected payload"), "unexpected error: {message}");

    // Only the accepted payload reaches the peer; the rejected one left no
    // bytes ahead of it.
    let mut wire = [0u8; 4];
    stream.read_exact(&mut wire).await.expect("accepted payload");
    assert_eq!(&wire, b"good");

    server.stop();
    server.wait_for_done().await;
}

#[tokio::test]
async fn undecoded_message_at_the_wire_is_an_error() {
    let (mut server, mut handles_rx, mut errors_rx) = start_gated_server().await;
    let addr = server.local_addr().expect("server is running");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let session = handles_rx.recv().await.expect("session handle");

    // No write handler encodes this, so it reaches the socket stage as a
    // Message and must be reported, not sent.
    session.write(Payload::message(42u32)).await.expect("queue message");
    session.write(b"ok".to_vec()).await.expect("queue bytes");

    let message = timeout(Duration::from_secs(5), errors_rx.recv())
        .await
        .expect("unencoded write reported")
        .expect("error chain ran");
    assert!(message.contains("no wire bytes"), "unexpected error: {message}");

    let mut wire = [0u8; 2];
    stream.read_exact(&mut wire).await.expect("later write still flows");
    assert_eq!(&wire, b"ok");

    server.stop();
    server.wait_for_done().await;
}
