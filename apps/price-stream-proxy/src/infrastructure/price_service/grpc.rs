//! gRPC Price Link
//!
//! Holds one bidirectional `GetPrices` stream to the price service. Interest
//! sets go out through a bounded queue feeding the request stream; inbound
//! batches are read by a background task and handed over through a channel,
//! so a server that only answers after the first interest message cannot
//! stall connection setup.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::transport::{Channel, Endpoint};

use super::proto::{
    self, GetCurrentPricesRequest, GetPricesRequest, price_service_client::PriceServiceClient,
};
use crate::application::ports::{PriceLink, PriceLinkError};
use crate::domain::streaming::{PriceUpdate, Symbol};
use crate::infrastructure::config::UpstreamSettings;

type BatchResult = Result<Vec<PriceUpdate>, PriceLinkError>;

// =============================================================================
// Conversions
// =============================================================================

impl From<proto::Price> for PriceUpdate {
    fn from(price: proto::Price) -> Self {
        Self {
            symbol: price.name,
            sell_price: price.selling_price,
            buy_price: price.purchase_price,
        }
    }
}

fn interest_request(symbols: &BTreeSet<Symbol>) -> GetPricesRequest {
    GetPricesRequest {
        names: symbols.iter().cloned().collect(),
    }
}

// =============================================================================
// gRPC Price Link
// =============================================================================

/// Price link over the price service's gRPC API.
pub struct GrpcPriceLink {
    client: PriceServiceClient<Channel>,
    outbound: mpsc::Sender<GetPricesRequest>,
    inbound: Mutex<mpsc::Receiver<BatchResult>>,
    _reader: DropGuard,
}

impl std::fmt::Debug for GrpcPriceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcPriceLink").finish_non_exhaustive()
    }
}

impl GrpcPriceLink {
    /// Connect to the price service and open the price stream.
    ///
    /// # Errors
    ///
    /// Returns `PriceLinkError::Connect` if the endpoint is invalid or the
    /// connection cannot be established within the configured timeout.
    pub async fn connect(settings: &UpstreamSettings) -> Result<Self, PriceLinkError> {
        let endpoint = Endpoint::from_shared(settings.endpoint())
            .map_err(|e| PriceLinkError::Connect {
                message: e.to_string(),
            })?
            .connect_timeout(settings.connect_timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| PriceLinkError::Connect {
                message: format!("{}: {e}", settings.endpoint()),
            })?;

        tracing::info!(endpoint = %settings.endpoint(), "Connected to price service");

        Ok(Self::open(channel, settings.interest_queue_capacity))
    }

    /// Open the price stream over an established channel.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime or with a zero queue capacity.
    #[must_use]
    pub fn open(channel: Channel, interest_queue_capacity: usize) -> Self {
        let client = PriceServiceClient::new(channel);
        let (outbound, requests) = mpsc::channel(interest_queue_capacity);
        let (batches, inbound) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        // Queue an empty interest set so servers that wait for the first
        // request still answer the call.
        let _ = outbound.try_send(GetPricesRequest::default());

        tokio::spawn(read_prices(
            client.clone(),
            ReceiverStream::new(requests),
            batches,
            cancel.clone(),
        ));

        Self {
            client,
            outbound,
            inbound: Mutex::new(inbound),
            _reader: cancel.drop_guard(),
        }
    }
}

async fn read_prices(
    mut client: PriceServiceClient<Channel>,
    requests: ReceiverStream<GetPricesRequest>,
    batches: mpsc::Sender<BatchResult>,
    cancel: CancellationToken,
) {
    let call = tokio::select! {
        () = cancel.cancelled() => return,
        call = client.get_prices(requests) => call,
    };

    let mut stream = match call {
        Ok(response) => response.into_inner(),
        Err(status) => {
            let _ = batches
                .send(Err(PriceLinkError::receive(status.message())))
                .await;
            return;
        }
    };

    tracing::debug!("Price stream open");

    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => return,
            message = stream.message() => message,
        };

        let item: BatchResult = match message {
            Ok(Some(response)) => Ok(response.prices.into_iter().map(PriceUpdate::from).collect()),
            Ok(None) => Err(PriceLinkError::Closed),
            Err(status) => Err(PriceLinkError::receive(format!(
                "{:?}: {}",
                status.code(),
                status.message()
            ))),
        };
        let terminal = item.is_err();

        if batches.send(item).await.is_err() || terminal {
            return;
        }
    }
}

#[async_trait]
impl PriceLink for GrpcPriceLink {
    async fn receive_batch(&self) -> Result<Vec<PriceUpdate>, PriceLinkError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(PriceLinkError::Closed))
    }

    async fn send_interest(&self, symbols: &BTreeSet<Symbol>) -> Result<(), PriceLinkError> {
        self.outbound
            .try_send(interest_request(symbols))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PriceLinkError::send("interest queue full"),
                mpsc::error::TrySendError::Closed(_) => PriceLinkError::send("price stream closed"),
            })
    }

    async fn current_prices(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, PriceUpdate>, PriceLinkError> {
        let mut client = self.client.clone();
        let response = client
            .get_current_prices(GetCurrentPricesRequest {
                names: symbols.to_vec(),
            })
            .await
            .map_err(|status| PriceLinkError::Rpc {
                message: status.message().to_string(),
            })?;

        Ok(response
            .into_inner()
            .prices
            .into_iter()
            .map(|(name, price)| (name, PriceUpdate::from(price)))
            .collect())
    }
}
