//! Read deadlines fire the timeout handler chain, not the error chain, and
//! leave the session usable.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    time::{Duration, timeout},
};
use wirechain::{BoxError, Capabilities, Error, Handler, Payload, SessionContext, TcpServer};

struct IdleWatch {
    timeouts: mpsc::UnboundedSender<()>,
    errors: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Handler for IdleWatch {
    fn capabilities(&self) -> Capabilities {
        Capabilities::READ | Capabilities::TIMEOUT | Capabilities::ERROR
    }

    async fn on_read(
        &self,
        ctx: &mut SessionContext,
        input: Payload,
    ) -> Result<Payload, BoxError> {
        let data = Bytes::copy_from_slice(ctx.buffer().data());
        let len = data.len();
        ctx.buffer_mut().consume(len);
        ctx.write(data);
        Ok(input)
    }

    async fn on_timeout(&self, _ctx: &mut SessionContext) -> Result<(), BoxError> {
        let _ = self.timeouts.send(());
        Ok(())
    }

    async fn on_error(&self, _ctx: &mut SessionContext, _error: &Error) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn idle_read_fires_timeout_chain() {
    let (timeouts_tx, mut timeouts_rx) = mpsc::unbounded_channel();
    let errors = Arc::new(AtomicUsize::new(0));

    let mut server = TcpServer::new();
    server.set_address("127.0.0.1:0");
    server.set_timeout(Some(Duration::from_millis(50)), None);
    server
        .add_handler(Arc::new(IdleWatch {
            timeouts: timeouts_tx,
            errors: Arc::clone(&errors),
        }))
        .expect("valid caps");
    server.start().await.expect("bind ephemeral port");
    let addr = server.local_addr().expect("server is running");

    let mut stream = TcpStream::connect(addr).await.expect("connect");

    // Stay silent past the deadline.
    timeout(Duration::from_secs(5), timeouts_rx.recv())
        .await
        .expect("deadline elapses")
        .expect("timeout chain ran");
    assert_eq!(errors.load(Ordering::SeqCst), 0, "deadline must not reach the error chain");

    // The session survives the timeout and still serves traffic.
    stream.write_all(b"still here").await.expect("send");
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.expect("echo after timeout");
    assert_eq!(&reply, b"still here");

    server.stop();
    server.wait_for_done().await;
}

#[tokio::test]
async fn quiet_connection_times_out_repeatedly() {
    let (timeouts_tx, mut timeouts_rx) = mpsc::unbounded_channel();
    let errors = Arc::new(AtomicUsize::new(0));

    let mut server = TcpServer::new();
    server.set_address("127.0.0.1:0");
    server.set_timeout(Some(Duration::from_millis(20)), None);
    server
        .add_handler(Arc::new(IdleWatch {
            timeouts: timeouts_tx,
            errors: Arc::clone(&errors),
        }))
        .expect("valid caps");
    server.start().await.expect("bind ephemeral port");
    let addr = server.local_addr().expect("server is running");

    let _stream = TcpStream::connect(addr).await.expect("connect");

    for _ in 0..3 {
        timeout(Duration::from_secs(5), timeouts_rx.recv())
            .await
            .expect("deadline keeps firing")
            .expect("timeout chain ran");
    }

    server.stop();
    server.wait_for_done().await;
}
