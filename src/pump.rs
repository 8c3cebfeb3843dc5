//! Interrupt driven byte pump
//!
//! An [`Endpoint`] bundles one half-duplex peripheral with the buffer it sends
//! from, the buffer it receives into and the [`Cursor`] shared with the other
//! end of the link. Its [`Endpoint::on_interrupt`] is the body of the
//! peripheral's interrupt handler.
//!
//! The endpoint has to be reachable from both `main` and the handler, so it
//! lives in a [`SharedEndpoint`]:
//!
//! ``` ignore
//! static CURSOR: Cursor = Cursor::new();
//! static MASTER: SharedEndpoint<'static, Spi<SPI1>, 32> = SharedEndpoint::new();
//!
//! #[interrupt]
//! fn SPI1() {
//!     MASTER.on_interrupt();
//! }
//! ```

use core::cell::RefCell;

use critical_section::Mutex;

use crate::halfduplex::{Event, HalfDuplex, LinkConfig};
use crate::link::{verify, Cursor, PhaseResult};

/// One end of the link
pub struct Endpoint<'a, D, const N: usize> {
    driver: D,
    outbound: &'a [u8; N],
    inbound: [u8; N],
    cursor: &'a Cursor,
}

impl<'a, D, const N: usize> Endpoint<'a, D, N>
where
    D: HalfDuplex,
{
    pub fn new(driver: D, outbound: &'a [u8; N], cursor: &'a Cursor) -> Self {
        Endpoint {
            driver,
            outbound,
            inbound: [0; N],
            cursor,
        }
    }

    /// Service whichever of the transmit and receive events are pending
    ///
    /// Both are checked on every call since the peripheral raises a single
    /// interrupt line for both.
    pub fn on_interrupt(&mut self) {
        if self.driver.is_pending(Event::Txe) {
            self.pump_tx();
        }
        if self.driver.is_pending(Event::Rxne) {
            self.pump_rx();
        }
    }

    fn pump_tx(&mut self) {
        let index = self.cursor.tx();
        if index >= N {
            self.driver.unlisten(Event::Txe);
            return;
        }

        match self.driver.send(self.outbound[index]) {
            Ok(()) => {
                self.cursor.set_tx(index + 1);
                if index + 1 == N {
                    self.driver.unlisten(Event::Txe);
                    trace!("tx complete after {=usize} bytes", N);
                }
            }
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(_)) => {
                self.cursor.fault();
                warn!("transmit error at byte {=usize}", index);
            }
        }
    }

    fn pump_rx(&mut self) {
        let workaround = self.driver.read_workaround();
        if workaround {
            self.driver.disable();
        }

        let index = self.cursor.rx();
        let complete = match self.driver.read() {
            Ok(byte) if index < N => {
                self.inbound[index] = byte;
                self.cursor.set_rx(index + 1);
                index + 1 == N
            }
            // receive source outlived the phase, drop the byte
            Ok(_) => true,
            Err(nb::Error::WouldBlock) => false,
            Err(nb::Error::Other(_)) => {
                self.cursor.fault();
                warn!("receive error at byte {=usize}", index);
                false
            }
        };

        if complete {
            self.driver.unlisten(Event::Rxne);
            trace!("rx complete after {=usize} bytes", N);
        } else if workaround {
            self.driver.enable();
        }
    }

    /// Zero the receive buffer for a new phase
    pub fn clear(&mut self) {
        self.inbound = [0; N];
    }

    pub fn outbound(&self) -> &'a [u8; N] {
        self.outbound
    }

    pub fn inbound(&self) -> &[u8; N] {
        &self.inbound
    }

    /// Compare what this endpoint received with what was sent to it
    pub fn verify(&self, sent: &[u8; N]) -> PhaseResult {
        verify(&self.inbound, sent)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Stop the peripheral and both of its interrupt sources
    pub fn quiesce(&mut self) {
        self.driver.disable();
        self.driver.unlisten(Event::Txe);
        self.driver.unlisten(Event::Rxne);
    }

    /// Configure a quiesced endpoint and arm the interrupt source for its direction
    pub fn arm(&mut self, config: &LinkConfig) {
        self.driver.configure(config);
        self.driver.listen(config.endpoint.event());
    }

    pub fn release(self) -> D {
        self.driver
    }
}

/// An [`Endpoint`] shared between `main` and an interrupt handler
pub struct SharedEndpoint<'a, D, const N: usize> {
    inner: Mutex<RefCell<Option<Endpoint<'a, D, N>>>>,
}

impl<'a, D, const N: usize> SharedEndpoint<'a, D, N>
where
    D: HalfDuplex,
{
    pub const fn new() -> Self {
        SharedEndpoint {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Move an endpoint in, returning the one it replaces
    pub fn install(&self, endpoint: Endpoint<'a, D, N>) -> Option<Endpoint<'a, D, N>> {
        critical_section::with(|cs| self.inner.borrow(cs).replace(Some(endpoint)))
    }

    pub fn take(&self) -> Option<Endpoint<'a, D, N>> {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }

    /// Run `f` on the endpoint inside a critical section
    ///
    /// Returns `None` if nothing is installed.
    pub fn with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Endpoint<'a, D, N>) -> R,
    {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().as_mut().map(f))
    }

    /// Interrupt handler body
    pub fn on_interrupt(&self) {
        self.with(|endpoint| endpoint.on_interrupt());
    }
}

impl<'a, D, const N: usize> Default for SharedEndpoint<'a, D, N>
where
    D: HalfDuplex,
{
    fn default() -> Self {
        Self::new()
    }
}
