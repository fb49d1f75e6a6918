//! One-stop handle over the transport and the peripheral services.

use tillbridge_core::{Capabilities, Peripheral};
use tillbridge_protocol::Frame;
use tracing::info;

use crate::{
    CapabilityRegistry, ClientConfig, ConnectionEvent, ConnectionState, PaymentService, Result,
    ScannerService, Transport, Unsubscribe,
};

/// Client for a single peripheral bridge.
///
/// Owns one [`Transport`] and the services built on it. All services share
/// the transport's outbound queue and subscription router, so there is
/// exactly one socket per client.
///
/// # Example
///
/// ```no_run
/// use tillbridge_client::{ClientConfig, PeripheralClient};
/// use tillbridge_core::Peripheral;
///
/// # async fn example() -> Result<(), tillbridge_client::ClientError> {
/// let client = PeripheralClient::new(ClientConfig::new("10.0.0.5:9100"));
/// client.connect().await?;
///
/// let _scans = client.scanner().on_scan(|scan| println!("{}", scan.barcode));
/// if client.capabilities().is_available(Peripheral::Scanner) {
///     client.scanner().enable()?;
/// }
///
/// client.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PeripheralClient {
    transport: Transport,
    capabilities: CapabilityRegistry,
    scanner: ScannerService,
    payment: PaymentService,
}

impl PeripheralClient {
    /// Build the transport and services. Does not connect.
    pub fn new(config: ClientConfig) -> Self {
        let transport = Transport::new(config);
        let outbound = transport.outbound().clone();
        let router = transport.router().clone();

        let capabilities = CapabilityRegistry::new(router.clone());
        let scanner = ScannerService::new(outbound.clone(), router.clone());
        let payment = PaymentService::new(
            outbound,
            router,
            transport.config().default_payment_timeout,
        );

        // Lives as long as the transport; survives disconnect and reconnect.
        let lost = payment.clone();
        let _ = transport.on_connection_change(move |event| {
            if let ConnectionEvent::Disconnected { reason } = event {
                lost.connection_lost(reason);
            }
        });

        Self {
            transport,
            capabilities,
            scanner,
            payment,
        }
    }

    /// Connect and start tracking capabilities.
    pub async fn connect(&self) -> Result<()> {
        self.capabilities.start();
        self.transport.connect().await
    }

    /// Close the connection and tear down every service.
    ///
    /// A pending payment collection settles with
    /// [`ClientError::ConnectionLost`](crate::ClientError::ConnectionLost).
    /// Handlers registered before this call are dropped.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        self.scanner.destroy();
        self.payment.destroy();
        self.capabilities.stop();
        self.transport.router().clear();
        info!("Peripheral client shut down");
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Last capabilities advertised by the bridge.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.capabilities()
    }

    pub fn is_available(&self, peripheral: Peripheral) -> bool {
        self.capabilities.is_available(peripheral)
    }

    pub fn on_capabilities(
        &self,
        listener: impl Fn(&Capabilities) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.capabilities.on_change(listener)
    }

    pub fn on_connection_change(
        &self,
        listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.transport.on_connection_change(listener)
    }

    pub fn scanner(&self) -> &ScannerService {
        &self.scanner
    }

    pub fn payment(&self) -> &PaymentService {
        &self.payment
    }

    pub fn capability_registry(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// See [`Transport::send_with_receipt`].
    pub async fn send_with_receipt(&self, frame: Frame) -> Result<()> {
        self.transport.send_with_receipt(frame).await
    }
}
