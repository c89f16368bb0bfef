//! Catalog discovery client
//!
//! [`DiscoveryClient`] owns one gRPC channel to a Flight service and lists the
//! datasets it advertises. Lifecycle is strictly forward:
//! `Unconnected -> Connected -> Closed`.

use std::sync::Arc;

use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Criteria, HandshakeRequest};
use bytes::Bytes;
use discovery_core::{ConnectionOptions, CoreError, Endpoint};
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tonic::transport::{Certificate, Channel, ClientTlsConfig};
use tonic::{Code, Status};
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, DiscoveryError};
use crate::listing::{guarded, DatasetStream};
use crate::Result;

/// Lifecycle state of a [`DiscoveryClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Lazy client that has not connected yet
    Unconnected,
    Connected,
    Closed,
}

struct Connection {
    state: ClientState,
    service: Option<FlightServiceClient<Channel>>,
}

/// Client for listing the datasets of a remote Flight service
pub struct DiscoveryClient {
    endpoint: Endpoint,
    options: ConnectionOptions,
    connection: Mutex<Connection>,
    // one listing at a time; closed on shutdown
    request_slot: Arc<Semaphore>,
    closed: watch::Sender<bool>,
}

impl DiscoveryClient {
    /// Connect to a Flight service.
    ///
    /// Opens the channel and performs the handshake within
    /// `options.timeout_ms`, reconnecting per `options.retry_policy`. With
    /// `options.lazy` set, nothing happens until the first listing.
    pub async fn connect(endpoint: Endpoint, options: ConnectionOptions) -> Result<Self> {
        options.validate()?;

        let connection = if options.lazy {
            info!("Deferring connection to {} until first request", endpoint);
            Connection {
                state: ClientState::Unconnected,
                service: None,
            }
        } else {
            let service = establish(&endpoint, &options).await?;
            Connection {
                state: ClientState::Connected,
                service: Some(service),
            }
        };

        let (closed, _) = watch::channel(false);
        Ok(Self {
            endpoint,
            options,
            connection: Mutex::new(connection),
            request_slot: Arc::new(Semaphore::new(1)),
            closed,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ClientState {
        self.connection.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ClientState::Closed
    }

    /// List every dataset the server advertises
    pub async fn list_datasets(&self) -> Result<DatasetStream> {
        self.list_datasets_with(Bytes::new()).await
    }

    /// List datasets matching a server-defined criteria expression
    pub async fn list_datasets_with(&self, criteria: impl Into<Bytes>) -> Result<DatasetStream> {
        let permit = match self.request_slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(DiscoveryError::Closed),
            Err(TryAcquireError::NoPermits) => return Err(DiscoveryError::Busy),
        };

        let mut closed = self.closed.subscribe();
        let mut service = match self.current_service()? {
            Some(service) => service,
            None => self.connect_deferred(&mut closed).await?,
        };

        let timeout = self.options.request_timeout();
        let deadline = Instant::now() + timeout;
        let criteria = Criteria {
            expression: criteria.into(),
        };

        debug!("Listing datasets on {}", self.endpoint);
        let response = guarded(&mut closed, deadline, timeout, service.list_flights(criteria)).await?;

        Ok(DatasetStream::new(
            response.into_inner(),
            closed,
            deadline,
            timeout,
            permit,
        ))
    }

    /// Release the connection. Safe to call repeatedly.
    ///
    /// Listings still in flight end with [`DiscoveryError::Closed`].
    pub fn close(&self) {
        let mut connection = self.connection.lock();
        if connection.state == ClientState::Closed {
            return;
        }
        connection.state = ClientState::Closed;
        connection.service = None;
        drop(connection);

        self.request_slot.close();
        self.closed.send_replace(true);
        info!("Closed connection to {}", self.endpoint);
    }

    fn current_service(&self) -> Result<Option<FlightServiceClient<Channel>>> {
        let connection = self.connection.lock();
        match connection.state {
            ClientState::Closed => Err(DiscoveryError::Closed),
            ClientState::Connected => Ok(connection.service.clone()),
            ClientState::Unconnected => Ok(None),
        }
    }

    async fn connect_deferred(
        &self,
        closed: &mut watch::Receiver<bool>,
    ) -> Result<FlightServiceClient<Channel>> {
        let service = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => return Err(DiscoveryError::Closed),
            result = establish(&self.endpoint, &self.options) => result?,
        };

        let mut connection = self.connection.lock();
        if connection.state == ClientState::Closed {
            return Err(DiscoveryError::Closed);
        }
        connection.state = ClientState::Connected;
        connection.service = Some(service.clone());
        Ok(service)
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// Open a channel, reconnecting per the retry policy
async fn establish(
    endpoint: &Endpoint,
    options: &ConnectionOptions,
) -> std::result::Result<FlightServiceClient<Channel>, ConnectionError> {
    let mut delays = options.retry_policy.delays();
    let mut attempt = 1;

    loop {
        match open_channel(endpoint, options).await {
            Ok(service) => return Ok(service),
            Err(e) if e.is_retryable() => match delays.next() {
                Some(delay) => {
                    warn!(
                        "Connect attempt {} to {} failed: {}; retrying in {}ms",
                        attempt,
                        endpoint,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

async fn open_channel(
    endpoint: &Endpoint,
    options: &ConnectionOptions,
) -> std::result::Result<FlightServiceClient<Channel>, ConnectionError> {
    let budget = options.timeout();
    let deadline = Instant::now() + budget;
    let tls = endpoint.scheme().is_tls() || options.tls_enabled;
    let uri = endpoint.uri(tls);

    info!("Connecting to Flight service at {}", uri);

    let mut builder = Channel::from_shared(uri.clone())
        .map_err(|e| CoreError::InvalidAddress {
            address: uri,
            reason: e.to_string(),
        })?
        .connect_timeout(budget);

    if tls {
        builder = builder
            .tls_config(tls_config(endpoint, options)?)
            .map_err(|e| ConnectionError::Tls(e.to_string()))?;
    }

    let channel = match tokio::time::timeout_at(deadline, builder.connect()).await {
        Ok(result) => result?,
        Err(_) => return Err(ConnectionError::Timeout(budget)),
    };

    let mut service = FlightServiceClient::new(channel);
    if options.handshake {
        match tokio::time::timeout_at(deadline, handshake(&mut service, options.protocol_version))
            .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout(budget)),
        }
    }

    Ok(service)
}

fn tls_config(
    endpoint: &Endpoint,
    options: &ConnectionOptions,
) -> std::result::Result<ClientTlsConfig, ConnectionError> {
    let domain = options
        .tls_domain
        .clone()
        .unwrap_or_else(|| endpoint.host().to_string());
    let config = ClientTlsConfig::new().domain_name(domain);

    match &options.tls_ca_cert {
        Some(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                ConnectionError::Tls(format!("reading CA bundle {}: {}", path.display(), e))
            })?;
            Ok(config.ca_certificate(Certificate::from_pem(pem)))
        }
        None => Ok(config.with_webpki_roots()),
    }
}

/// Exchange protocol versions with the server.
///
/// Servers that do not implement `Handshake` are accepted as-is.
async fn handshake(
    service: &mut FlightServiceClient<Channel>,
    requested: u64,
) -> std::result::Result<(), ConnectionError> {
    let request = HandshakeRequest {
        protocol_version: requested,
        payload: Bytes::new(),
    };

    let mut responses = match service.handshake(stream::once(async move { request })).await {
        Ok(response) => response.into_inner(),
        Err(status) => return unimplemented_is_ok(status),
    };

    loop {
        match responses.message().await {
            Ok(Some(response)) if response.protocol_version != requested => {
                return Err(ConnectionError::VersionMismatch {
                    requested,
                    actual: response.protocol_version,
                })
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(status) => return unimplemented_is_ok(status),
        }
    }

    debug!("Handshake completed with protocol version {}", requested);
    Ok(())
}

fn unimplemented_is_ok(status: Status) -> std::result::Result<(), ConnectionError> {
    if status.code() == Code::Unimplemented {
        debug!("Server does not implement handshake; continuing");
        Ok(())
    } else {
        Err(ConnectionError::Rejected(status))
    }
}
