//! Host side model of two SPI peripherals sharing one data line
//!
//! [`Wire::clock`] moves at most one frame per call from the enabled
//! transmitter to the enabled receiver, provided a master is enabled and the
//! select line is asserted. Interrupt handlers are not called by the model,
//! the test decides when to run them.
//!
//! A transmitter stays busy for one more clock after its last frame reached
//! the receiver, the trailing edge of that frame.
//!
//! [`SimChannel`]s attached with [`Wire::channel`] serve DMA requests around
//! every clock: they fill an empty transmit buffer before the frame moves and
//! empty a full receive buffer after it.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::v2::OutputPin;

use crate::dma::{Channel, DmaDirection};
use crate::halfduplex::{Direction, EndpointRole, Event, HalfDuplex, HalfDuplexDma, LinkConfig, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Configure(EndpointRole),
    Enable,
    Disable,
    Listen(Event),
    Unlisten(Event),
    Send(u8),
    Read(u8),
    EnableDma(Event),
    DisableDma(Event),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    Overrun,
}

#[derive(Default)]
struct Port {
    role: Option<EndpointRole>,
    enabled: bool,
    txeie: bool,
    rxneie: bool,
    tx: Option<u8>,
    shift: Option<u8>,
    rx: Option<u8>,
    overrun: bool,
    trailing: bool,
    txdma: bool,
    rxdma: bool,
    workaround: bool,
    sent: Vec<u8>,
    log: Vec<Call>,
}

impl Port {
    fn drives(&self, direction: Direction) -> bool {
        self.enabled && self.role.map_or(false, |r| r.direction == direction)
    }

    fn busy(&self) -> bool {
        self.trailing || self.shift.is_some() || (self.tx.is_some() && self.drives(Direction::Transmit))
    }
}

struct Fault {
    window: usize,
    index: usize,
    mask: u8,
}

#[derive(Default)]
struct WireState {
    selected: bool,
    windows: usize,
    window_bytes: usize,
    fault: Option<Fault>,
    busy_at_release: Vec<bool>,
}

struct DmaState {
    memory: *mut u8,
    len: usize,
    done: usize,
    direction: Option<DmaDirection>,
    running: bool,
}

impl Default for DmaState {
    fn default() -> Self {
        DmaState {
            memory: std::ptr::null_mut(),
            len: 0,
            done: 0,
            direction: None,
            running: false,
        }
    }
}

type Attached = (Rc<RefCell<Port>>, Rc<RefCell<DmaState>>);

#[derive(Clone, Default)]
pub struct Wire {
    ports: Rc<RefCell<Vec<Rc<RefCell<Port>>>>>,
    channels: Rc<RefCell<Vec<Attached>>>,
    state: Rc<RefCell<WireState>>,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new peripheral attached to the data line
    pub fn endpoint(&self) -> SimSpi {
        let port = Rc::new(RefCell::new(Port::default()));
        self.ports.borrow_mut().push(port.clone());
        SimSpi { port }
    }

    /// A DMA channel serving the requests of `spi`
    pub fn channel(&self, spi: &SimSpi) -> SimChannel {
        let state = Rc::new(RefCell::new(DmaState::default()));
        self.channels.borrow_mut().push((spi.port.clone(), state.clone()));
        SimChannel { state }
    }

    /// The software driven select line
    pub fn select(&self) -> SelectPin {
        SelectPin { wire: self.clone() }
    }

    /// Flip `mask` into the `index`th frame of the `window`th select window
    pub fn corrupt(&self, window: usize, index: usize, mask: u8) {
        self.state.borrow_mut().fault = Some(Fault {
            window,
            index,
            mask,
        });
    }

    pub fn is_selected(&self) -> bool {
        self.state.borrow().selected
    }

    /// Whether any peripheral was busy each time the select line was released
    pub fn busy_at_release(&self) -> Vec<bool> {
        self.state.borrow().busy_at_release.clone()
    }

    fn any_busy(&self) -> bool {
        self.ports.borrow().iter().any(|p| p.borrow().busy())
    }

    /// Serve DMA requests and shift one frame
    pub fn clock(&self) {
        self.serve_dma();
        self.shift();
        self.serve_dma();
    }

    fn serve_dma(&self) {
        for (port, channel) in self.channels.borrow().iter() {
            let mut port = port.borrow_mut();
            let mut ch = channel.borrow_mut();
            if !ch.running || ch.done == ch.len {
                continue;
            }
            match ch.direction {
                Some(DmaDirection::MemoryToPeripheral) if port.txdma && port.tx.is_none() => {
                    // the transfer owns `memory` while the channel runs
                    let byte = unsafe { *ch.memory.add(ch.done) };
                    port.tx = Some(byte);
                    port.sent.push(byte);
                    ch.done += 1;
                }
                Some(DmaDirection::PeripheralToMemory) if port.rxdma => {
                    if let Some(byte) = port.rx.take() {
                        unsafe { *ch.memory.add(ch.done) = byte };
                        ch.done += 1;
                    }
                }
                _ => {}
            }
        }
    }

    fn shift(&self) {
        let mut state = self.state.borrow_mut();
        if !state.selected {
            return;
        }

        let ports = self.ports.borrow();
        let clocked = ports.iter().any(|p| {
            let p = p.borrow();
            p.enabled && p.role.map_or(false, |r| r.role == Role::Master)
        });
        if !clocked {
            return;
        }

        let transmitter = match ports.iter().find(|p| p.borrow().drives(Direction::Transmit)) {
            Some(port) => port,
            None => return,
        };
        let receiver = ports.iter().find(|p| p.borrow().drives(Direction::Receive));

        let mut tx = transmitter.borrow_mut();
        tx.trailing = false;
        if let Some(mut byte) = tx.shift.take() {
            tx.trailing = true;
            let window = state.windows.saturating_sub(1);
            let index = state.window_bytes;
            if let Some(fault) = &state.fault {
                if fault.window == window && fault.index == index {
                    byte ^= fault.mask;
                }
            }
            state.window_bytes += 1;

            if let Some(receiver) = receiver {
                let mut rx = receiver.borrow_mut();
                if rx.rx.is_some() {
                    rx.overrun = true;
                } else {
                    rx.rx = Some(byte);
                }
            }
        }
        tx.shift = tx.tx.take();
    }
}

pub struct SimSpi {
    port: Rc<RefCell<Port>>,
}

impl SimSpi {
    pub fn with_read_workaround(self) -> Self {
        self.port.borrow_mut().workaround = true;
        self
    }

    /// Everything handed to `send`, in order
    pub fn sent(&self) -> Vec<u8> {
        self.port.borrow().sent.clone()
    }

    pub fn log(&self) -> Vec<Call> {
        self.port.borrow().log.clone()
    }

    pub fn clear_log(&mut self) {
        self.port.borrow_mut().log.clear();
    }

    pub fn unlisten_count(&self, event: Event) -> usize {
        self.port
            .borrow()
            .log
            .iter()
            .filter(|c| **c == Call::Unlisten(event))
            .count()
    }

    /// Move the transmit buffer out as if the shift register took it
    pub fn drain_tx(&mut self) {
        self.port.borrow_mut().tx = None;
    }

    /// Place a frame in the receive buffer
    pub fn deliver(&mut self, byte: u8) {
        let mut port = self.port.borrow_mut();
        if port.rx.is_some() {
            port.overrun = true;
        } else {
            port.rx = Some(byte);
        }
    }

    pub fn role(&self) -> Option<EndpointRole> {
        self.port.borrow().role
    }
}

impl HalfDuplex for SimSpi {
    type Error = SimError;

    fn configure(&mut self, config: &LinkConfig) {
        let mut port = self.port.borrow_mut();
        assert!(!port.enabled, "reconfigured while enabled");
        port.role = Some(config.endpoint);
        port.log.push(Call::Configure(config.endpoint));
    }

    fn enable(&mut self) {
        let mut port = self.port.borrow_mut();
        port.enabled = true;
        port.log.push(Call::Enable);
    }

    fn disable(&mut self) {
        let mut port = self.port.borrow_mut();
        port.enabled = false;
        port.trailing = false;
        port.log.push(Call::Disable);
    }

    fn is_enabled(&self) -> bool {
        self.port.borrow().enabled
    }

    fn listen(&mut self, event: Event) {
        let mut port = self.port.borrow_mut();
        match event {
            Event::Txe => port.txeie = true,
            Event::Rxne => port.rxneie = true,
        }
        port.log.push(Call::Listen(event));
    }

    fn unlisten(&mut self, event: Event) {
        let mut port = self.port.borrow_mut();
        match event {
            Event::Txe => port.txeie = false,
            Event::Rxne => port.rxneie = false,
        }
        port.log.push(Call::Unlisten(event));
    }

    fn is_pending(&self, event: Event) -> bool {
        let port = self.port.borrow();
        match event {
            Event::Txe => port.txeie && port.tx.is_none(),
            Event::Rxne => port.rxneie && (port.rx.is_some() || port.overrun),
        }
    }

    fn is_busy(&self) -> bool {
        self.port.borrow().busy()
    }

    fn send(&mut self, byte: u8) -> nb::Result<(), SimError> {
        let mut port = self.port.borrow_mut();
        if port.tx.is_some() {
            return Err(nb::Error::WouldBlock);
        }
        port.tx = Some(byte);
        port.sent.push(byte);
        port.log.push(Call::Send(byte));
        Ok(())
    }

    fn read(&mut self) -> nb::Result<u8, SimError> {
        let mut port = self.port.borrow_mut();
        if port.overrun {
            port.overrun = false;
            port.rx = None;
            return Err(nb::Error::Other(SimError::Overrun));
        }
        match port.rx.take() {
            Some(byte) => {
                port.log.push(Call::Read(byte));
                Ok(byte)
            }
            None => Err(nb::Error::WouldBlock),
        }
    }

    fn read_workaround(&self) -> bool {
        self.port.borrow().workaround
    }
}

impl HalfDuplexDma for SimSpi {
    fn enable_dma(&mut self, event: Event) {
        let mut port = self.port.borrow_mut();
        match event {
            Event::Txe => port.txdma = true,
            Event::Rxne => port.rxdma = true,
        }
        port.log.push(Call::EnableDma(event));
    }

    fn disable_dma(&mut self, event: Event) {
        let mut port = self.port.borrow_mut();
        match event {
            Event::Txe => port.txdma = false,
            Event::Rxne => port.rxdma = false,
        }
        port.log.push(Call::DisableDma(event));
    }

    fn data_register(&self) -> usize {
        0
    }
}

/// DMA channel moving bytes between a buffer and one simulated peripheral
pub struct SimChannel {
    state: Rc<RefCell<DmaState>>,
}

impl SimChannel {
    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }
}

impl Channel for SimChannel {
    unsafe fn configure(&mut self, _peripheral: usize, memory: *mut u8, len: usize, direction: DmaDirection) {
        let mut ch = self.state.borrow_mut();
        assert!(!ch.running, "reconfigured while running");
        *ch = DmaState {
            memory,
            len,
            done: 0,
            direction: Some(direction),
            running: false,
        };
    }

    fn start(&mut self) {
        self.state.borrow_mut().running = true;
    }

    fn stop(&mut self) {
        self.state.borrow_mut().running = false;
    }

    fn remaining(&self) -> usize {
        let ch = self.state.borrow();
        ch.len - ch.done
    }

    fn is_complete(&self) -> bool {
        let ch = self.state.borrow();
        ch.direction.is_some() && ch.done == ch.len
    }
}

/// Active low select line
pub struct SelectPin {
    wire: Wire,
}

impl OutputPin for SelectPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut state = self.wire.state.borrow_mut();
        if !state.selected {
            state.selected = true;
            state.windows += 1;
            state.window_bytes = 0;
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let busy = self.wire.any_busy();
        let mut state = self.wire.state.borrow_mut();
        if state.selected {
            state.selected = false;
            state.busy_at_release.push(busy);
        }
        Ok(())
    }
}

/// An LED whose state can be inspected through any of its clones
#[derive(Clone, Default)]
pub struct Led {
    lit: Rc<Cell<bool>>,
}

impl Led {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_lit(&self) -> bool {
        self.lit.get()
    }
}

impl OutputPin for Led {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.lit.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.lit.set(true);
        Ok(())
    }
}
