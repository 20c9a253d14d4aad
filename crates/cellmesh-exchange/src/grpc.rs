//! gRPC transport: one bidirectional relationship per peer node (spec §4.5
//! "a proxy bundles all communication with one peer node"), built on a
//! generated `tonic` client/server pair and a blocking `Transport` facade so
//! the scheduler's synchronous dispatch loop (spec §4.3) can call it
//! directly without becoming async itself.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use cellmesh_types::NodeId;
use parking_lot::Mutex;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};

use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::{MessageTag, Transport, WireMessage};

pub mod proto {
    tonic::include_proto!("cellmesh.exchange");
}

use proto::exchange_client::ExchangeClient;
use proto::exchange_server::{Exchange, ExchangeServer};
use proto::{Ack, WireMessageProto};

type Inbox = Arc<Mutex<HashMap<MessageTag, VecDeque<WireMessage>>>>;

/// Server-side config, mirroring the bind-address/keepalive knobs the
/// workflow engine's own gRPC server exposes.
#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    pub bind_addr: SocketAddr,
    pub tcp_nodelay: bool,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:50900".parse().expect("valid socket address"),
            tcp_nodelay: true,
        }
    }
}

/// The `Exchange` service implementation: every inbound `Send` just drops
/// the message into this node's shared inbox, keyed by tag (the `try_recv`
/// side of `GrpcTransport` drains the same map).
struct ExchangeService {
    inbox: Inbox,
}

#[tonic::async_trait]
impl Exchange for ExchangeService {
    async fn send(&self, request: Request<WireMessageProto>) -> Result<Response<Ack>, Status> {
        let msg = request.into_inner();
        let tag = MessageTag(msg.tag);
        self.inbox
            .lock()
            .entry(tag)
            .or_default()
            .push_back(WireMessage { tag, payload: msg.payload });
        Ok(Response::new(Ack {}))
    }
}

/// Owns the listener; run with `.serve().await` on a Tokio runtime.
pub struct GrpcServer {
    config: GrpcServerConfig,
    inbox: Inbox,
}

impl GrpcServer {
    pub async fn serve(self) -> Result<(), tonic::transport::Error> {
        let svc = ExchangeServer::new(ExchangeService { inbox: self.inbox });
        Server::builder()
            .tcp_nodelay(self.config.tcp_nodelay)
            .add_service(svc)
            .serve(self.config.bind_addr)
            .await
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

/// A `Transport` backed by one `tonic` client per peer node plus the inbox
/// the co-located `GrpcServer` fills in. All calls are made synchronously
/// from the caller's perspective by blocking on `runtime`; the scheduler
/// never awaits directly (spec §5 "no coroutines or cooperative yields").
pub struct GrpcTransport {
    node: NodeId,
    runtime: tokio::runtime::Handle,
    clients: HashMap<NodeId, Mutex<ExchangeClient<Channel>>>,
    inbox: Inbox,
}

impl GrpcTransport {
    /// Connects eagerly to every peer in `peer_addrs` and returns the
    /// transport handle alongside the server that must be `serve()`d to
    /// receive from them.
    pub fn connect(
        node: NodeId,
        peer_addrs: &HashMap<NodeId, String>,
        server_config: GrpcServerConfig,
        runtime: tokio::runtime::Handle,
    ) -> ExchangeResult<(Self, GrpcServer)> {
        let inbox: Inbox = Arc::new(Mutex::new(HashMap::new()));
        let mut clients = HashMap::with_capacity(peer_addrs.len());
        for (&peer, addr) in peer_addrs {
            let endpoint = addr.clone();
            let client = runtime
                .block_on(async move { ExchangeClient::connect(endpoint).await })
                .map_err(|e| ExchangeError::Send {
                    to: peer,
                    tag: 0,
                    detail: format!("connect to {addr}: {e}"),
                })?;
            clients.insert(peer, Mutex::new(client));
        }
        let transport = Self { node, runtime, clients, inbox: inbox.clone() };
        let server = GrpcServer { config: server_config, inbox };
        Ok((transport, server))
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Transport for GrpcTransport {
    fn send(&self, to: NodeId, msg: WireMessage) -> ExchangeResult<()> {
        let client = self
            .clients
            .get(&to)
            .ok_or_else(|| ExchangeError::Send { to, tag: msg.tag.0, detail: "no peer client for node".into() })?;
        let request = Request::new(WireMessageProto { tag: msg.tag.0, payload: msg.payload });
        let mut client = client.lock();
        self.runtime
            .block_on(client.send(request))
            .map_err(|e| ExchangeError::Send { to, tag: msg.tag.0, detail: e.to_string() })?;
        Ok(())
    }

    fn try_recv(&self, tag: MessageTag) -> ExchangeResult<Option<WireMessage>> {
        Ok(self.inbox.lock().get_mut(&tag).and_then(|q| q.pop_front()))
    }
}
