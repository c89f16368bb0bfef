//! Lazy catalog listings
//!
//! A [`DatasetStream`] yields descriptors as the server sends them. Each read
//! races the request deadline and the owning client's close signal, and the
//! stream gives up its request slot as soon as it finishes, fails or is
//! dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use arrow_flight::flight_descriptor::DescriptorType;
use arrow_flight::FlightInfo;
use discovery_core::{DatasetDescriptor, DatasetLocator};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::time::Instant;
use tonic::Streaming;
use tracing::{debug, warn};

use crate::error::{DiscoveryError, RequestError};
use crate::Result;

/// Descriptors from one catalog request, consumable once
pub struct DatasetStream {
    inner: BoxStream<'static, Result<DatasetDescriptor>>,
}

impl DatasetStream {
    pub(crate) fn new(
        messages: Streaming<FlightInfo>,
        closed: watch::Receiver<bool>,
        deadline: Instant,
        timeout: Duration,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let listing = Listing {
            messages: Some(messages),
            closed,
            deadline,
            timeout,
            permit: Some(permit),
            received: 0,
        };

        let inner = stream::unfold(listing, |mut listing| async move {
            let item = listing.next().await?;
            Some((item, listing))
        })
        .boxed();

        Self { inner }
    }

    /// Drain the listing, failing on the first error
    pub async fn collect_all(self) -> Result<Vec<DatasetDescriptor>> {
        self.try_collect().await
    }
}

impl Stream for DatasetStream {
    type Item = Result<DatasetDescriptor>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for DatasetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetStream").finish_non_exhaustive()
    }
}

struct Listing {
    messages: Option<Streaming<FlightInfo>>,
    closed: watch::Receiver<bool>,
    deadline: Instant,
    timeout: Duration,
    permit: Option<OwnedSemaphorePermit>,
    received: usize,
}

impl Listing {
    async fn next(&mut self) -> Option<Result<DatasetDescriptor>> {
        let messages = self.messages.as_mut()?;
        let outcome = guarded(
            &mut self.closed,
            self.deadline,
            self.timeout,
            messages.message(),
        )
        .await;

        match outcome {
            Ok(Some(info)) => match descriptor_from_info(info) {
                Ok(descriptor) => {
                    self.received += 1;
                    debug!("Received dataset {}", descriptor);
                    Some(Ok(descriptor))
                }
                Err(e) => {
                    self.release();
                    Some(Err(e.into()))
                }
            },
            Ok(None) => {
                debug!("Catalog listing complete: {} datasets", self.received);
                self.release();
                None
            }
            Err(e) => {
                warn!(
                    "Catalog listing failed after {} datasets: {}",
                    self.received, e
                );
                self.release();
                Some(Err(e))
            }
        }
    }

    /// Drop the response stream (resetting it if unfinished) and free the slot
    fn release(&mut self) {
        self.messages = None;
        self.permit = None;
    }
}

/// Await `fut`, bailing out on client close or once `deadline` passes
pub(crate) async fn guarded<T, E, F>(
    closed: &mut watch::Receiver<bool>,
    deadline: Instant,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<DiscoveryError>,
{
    tokio::select! {
        biased;
        _ = closed.wait_for(|closed| *closed) => Err(DiscoveryError::Closed),
        outcome = tokio::time::timeout_at(deadline, fut) => match outcome {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(RequestError::Timeout(timeout).into()),
        },
    }
}

/// Convert one catalog record into a descriptor
pub(crate) fn descriptor_from_info(
    mut info: FlightInfo,
) -> std::result::Result<DatasetDescriptor, RequestError> {
    let flight_descriptor = info
        .flight_descriptor
        .take()
        .ok_or_else(|| RequestError::Decode("catalog record has no descriptor".to_string()))?;

    let locator = match flight_descriptor.r#type() {
        DescriptorType::Path => DatasetLocator::Path(flight_descriptor.path),
        DescriptorType::Cmd => DatasetLocator::Command(flight_descriptor.cmd),
        DescriptorType::Unknown if !flight_descriptor.path.is_empty() => {
            DatasetLocator::Path(flight_descriptor.path)
        }
        DescriptorType::Unknown if !flight_descriptor.cmd.is_empty() => {
            DatasetLocator::Command(flight_descriptor.cmd)
        }
        DescriptorType::Unknown => {
            return Err(RequestError::Decode(
                "descriptor has neither path nor command".to_string(),
            ))
        }
    };

    let locations = info
        .endpoint
        .iter()
        .flat_map(|endpoint| endpoint.location.iter().map(|loc| loc.uri.clone()))
        .collect();

    let mut descriptor = DatasetDescriptor::new(locator)
        .with_total_records(u64::try_from(info.total_records).ok())
        .with_total_bytes(u64::try_from(info.total_bytes).ok())
        .with_ordered(info.ordered)
        .with_locations(locations)
        .with_app_metadata(std::mem::take(&mut info.app_metadata));

    if !info.schema.is_empty() {
        let schema = info.try_decode_schema().map_err(|e| {
            RequestError::Decode(format!("schema of '{}': {}", descriptor.identifier(), e))
        })?;
        descriptor = descriptor.with_schema(Arc::new(schema));
    }

    Ok(descriptor)
}
