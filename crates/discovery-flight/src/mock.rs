//! In-process catalog server for tests and demos
//!
//! [`MockCatalogServer`] answers `ListFlights` with a fixed catalog over a real
//! gRPC socket. It can misbehave on request: abort the listing after a number
//! of records, stall between records, or answer the handshake with a different
//! protocol version. Every other Flight call is unimplemented.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::Schema;
use arrow::error::ArrowError;
use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use discovery_core::Endpoint;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

/// Builder for an in-process Flight catalog
#[derive(Debug, Clone, Default)]
pub struct MockCatalogServer {
    catalog: Vec<FlightInfo>,
    fail_after: Option<usize>,
    delay: Duration,
    handshake: HandshakeMode,
}

#[derive(Debug, Clone, Copy, Default)]
enum HandshakeMode {
    #[default]
    Echo,
    Version(u64),
    Unimplemented,
}

impl MockCatalogServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a path dataset; `/` separates path segments
    pub fn with_dataset(mut self, identifier: &str) -> Self {
        let info = FlightInfo::new()
            .with_descriptor(path_descriptor(identifier))
            .with_total_records(-1)
            .with_total_bytes(-1);
        self.catalog.push(info);
        self
    }

    /// Advertise a path dataset with schema and row count
    pub fn with_table(
        mut self,
        identifier: &str,
        schema: &Schema,
        total_records: i64,
    ) -> Result<Self, ArrowError> {
        let info = FlightInfo::new()
            .with_descriptor(path_descriptor(identifier))
            .try_with_schema(schema)?
            .with_total_records(total_records)
            .with_total_bytes(-1);
        self.catalog.push(info);
        Ok(self)
    }

    /// Advertise a raw catalog record
    pub fn with_flight_info(mut self, info: FlightInfo) -> Self {
        self.catalog.push(info);
        self
    }

    /// End every listing with an `UNAVAILABLE` status after `records` records
    pub fn fail_after(mut self, records: usize) -> Self {
        self.fail_after = Some(records);
        self
    }

    /// Pause before every record after the first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer handshakes with a fixed protocol version
    pub fn with_protocol_version(mut self, version: u64) -> Self {
        self.handshake = HandshakeMode::Version(version);
        self
    }

    /// Behave like a server that does not implement `Handshake`
    pub fn without_handshake(mut self) -> Self {
        self.handshake = HandshakeMode::Unimplemented;
        self
    }

    /// Bind an ephemeral localhost port and start serving
    pub async fn spawn(self) -> std::io::Result<MockServerHandle> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let service = MockCatalogService {
            server: self,
            open_streams: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
        };
        let open_streams = service.open_streams.clone();
        let requests = service.requests.clone();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            Server::builder()
                .add_service(FlightServiceServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!("Mock catalog listening on {}", addr);
        Ok(MockServerHandle {
            addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            open_streams,
            requests,
        })
    }
}

fn path_descriptor(identifier: &str) -> FlightDescriptor {
    FlightDescriptor::new_path(identifier.split('/').map(str::to_string).collect())
}

/// Running mock server; stops when dropped
pub struct MockServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
    open_streams: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

impl MockServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// Listing responses the server is still producing
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// `ListFlights` calls received so far
    pub fn list_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Stop accepting connections and wait for the server task
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MockServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Counts a listing response until it is dropped
struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Feed {
    flights: std::vec::IntoIter<FlightInfo>,
    sent: usize,
    fail_after: Option<usize>,
    delay: Duration,
    done: bool,
    _open: OpenStream,
}

struct MockCatalogService {
    server: MockCatalogServer,
    open_streams: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

impl MockCatalogService {
    /// A non-empty criteria expression is treated as an identifier prefix
    fn matching(&self, expression: &[u8]) -> Vec<FlightInfo> {
        let prefix = String::from_utf8_lossy(expression);
        self.server
            .catalog
            .iter()
            .filter(|info| {
                prefix.is_empty()
                    || info
                        .flight_descriptor
                        .as_ref()
                        .map(|d| d.path.join("/").starts_with(prefix.as_ref()))
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

#[tonic::async_trait]
impl FlightService for MockCatalogService {
    type HandshakeStream = BoxStream<'static, Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, Result<FlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, Result<PutResult, Status>>;
    type DoActionStream = BoxStream<'static, Result<arrow_flight::Result, Status>>;
    type ListActionsStream = BoxStream<'static, Result<ActionType, Status>>;
    type DoExchangeStream = BoxStream<'static, Result<FlightData, Status>>;

    async fn handshake(
        &self,
        request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        let mut incoming = request.into_inner();
        let requested = incoming
            .message()
            .await?
            .map(|r| r.protocol_version)
            .unwrap_or_default();

        let protocol_version = match self.server.handshake {
            HandshakeMode::Echo => requested,
            HandshakeMode::Version(version) => version,
            HandshakeMode::Unimplemented => {
                return Err(Status::unimplemented("handshake is not supported"))
            }
        };

        let response = HandshakeResponse {
            protocol_version,
            payload: Default::default(),
        };
        let stream = stream::once(async { Ok(response) }).boxed();
        Ok(Response::new(stream))
    }

    async fn list_flights(
        &self,
        request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let criteria = request.into_inner();
        let flights = self.matching(&criteria.expression);
        debug!("Serving catalog of {} flights", flights.len());

        let feed = Feed {
            flights: flights.into_iter(),
            sent: 0,
            fail_after: self.server.fail_after,
            delay: self.server.delay,
            done: false,
            _open: OpenStream::new(self.open_streams.clone()),
        };

        let stream = stream::unfold(feed, |mut feed| async move {
            if feed.done {
                return None;
            }
            if feed.fail_after == Some(feed.sent) {
                feed.done = true;
                let status = Status::unavailable(format!(
                    "catalog stream aborted after {} records",
                    feed.sent
                ));
                return Some((Err(status), feed));
            }

            let info = feed.flights.next()?;
            if feed.sent > 0 && !feed.delay.is_zero() {
                tokio::time::sleep(feed.delay).await;
            }
            feed.sent += 1;
            Some((Ok(info), feed))
        })
        .boxed();

        Ok(Response::new(stream))
    }

    async fn get_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        Err(Status::unimplemented("get_flight_info"))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info"))
    }

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("get_schema"))
    }

    async fn do_get(
        &self,
        _request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        Err(Status::unimplemented("do_get"))
    }

    async fn do_put(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        Err(Status::unimplemented("do_put"))
    }

    async fn do_action(
        &self,
        _request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        Err(Status::unimplemented("do_action"))
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        Ok(Response::new(
            stream::empty::<Result<ActionType, Status>>().boxed(),
        ))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange"))
    }
}
