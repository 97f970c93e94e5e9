//! End-to-end reactor tests: a client connects, sends a frame, and a loaded
//! echoing module replies over the bus.

use dsme_bus::{Bus, HandlerSpec, ModuleContext, PolicyModule};
use dsme_eventloop::{EventLoop, IpcServer, SelfPipe};
use dsme_protocol::{types::type_id, Endpoint, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

struct Echo;

impl PolicyModule for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }
    fn handled_types(&self) -> &[HandlerSpec] {
        const H: &[HandlerSpec] = &[HandlerSpec::new(type_id::STATE_QUERY, 0)];
        H
    }
    fn handle(&mut self, ctx: &mut ModuleContext, _from: Endpoint, _message: &Message) {
        ctx.broadcast(Message::StateChangeInd { state: dsme_protocol::DeviceState::User });
    }
}

#[tokio::test]
async fn client_request_is_answered_over_the_control_socket() {
    let dir = tempfile::tempdir().unwrap();
    let sock_path = dir.path().join("ctl.sock");

    let mut bus = Bus::new();
    bus.load_module(Box::new(Echo), 0);

    let ipc = IpcServer::bind(sock_path.to_str().unwrap()).unwrap();
    // Signal handling is process-global; this test only needs the reactor's
    // select loop to have a pipe to wait on, not a live signal delivery.
    let pipe = SelfPipe::install().expect("self-pipe installs once per test binary");
    let mut reactor = EventLoop::new(bus, ipc, pipe);

    let mut client = UnixStream::connect(&sock_path).await.unwrap();
    let request = dsme_protocol::wire::encode(&Message::StateQuery);

    let accept_and_dispatch = async {
        loop {
            reactor.tick().await;
        }
    };

    tokio::select! {
        _ = accept_and_dispatch => {}
        _ = async {
            client.write_all(&request).await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = client.read(&mut buf).await.unwrap();
            let (msg, _) = dsme_protocol::wire::decode(&buf[..n]).unwrap();
            assert_eq!(msg, Message::StateChangeInd { state: dsme_protocol::DeviceState::User });
        } => {}
    }
}
