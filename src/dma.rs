//! DMA fed transfer over the half-duplex link
//!
//! Instead of the interrupt pump moving every byte, the peripherals raise DMA
//! requests and two channels move the whole buffer: one from memory into A's
//! data register, one from B's data register into memory. Only the forward
//! direction (A sends, B receives) is provided. The select line, the busy
//! drain and the final comparison are the same as for
//! [`RoleSwitch::forward`](crate::switch::RoleSwitch::forward).
//!
//! The buffers are moved into [`DmaLink::forward`] and handed back once both
//! channels are stopped, so nothing else can touch them while a channel may
//! still write.

use core::slice;
use core::sync::atomic::{compiler_fence, Ordering};

use embedded_dma::{ReadBuffer, WriteBuffer};
use embedded_hal::digital::v2::OutputPin;

use crate::halfduplex::{Divider, EndpointRole, Event, HalfDuplex, HalfDuplexDma, LinkConfig, Mode};
use crate::link::{verify, Cursor, PhaseResult};
use crate::switch::{Error, Relax};

#[cfg(feature = "device-selected")]
use crate::pac::{DMA1, RCC};

/// Which way a channel moves data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaDirection {
    MemoryToPeripheral,
    PeripheralToMemory,
}

/// One DMA channel serving a peripheral's data register
pub trait Channel {
    /// Point the channel at a data register and `len` bytes of memory
    ///
    /// The channel stays stopped.
    ///
    /// # Safety
    ///
    /// `memory` must stay valid for `len` bytes until [`Channel::stop`] has
    /// returned. For [`DmaDirection::PeripheralToMemory`] nothing else may
    /// access it in that time.
    unsafe fn configure(&mut self, peripheral: usize, memory: *mut u8, len: usize, direction: DmaDirection);

    fn start(&mut self);

    fn stop(&mut self);

    /// Frames not moved yet
    fn remaining(&self) -> usize;

    /// Transfer complete flag
    fn is_complete(&self) -> bool;
}

/// Largest buffer a channel can move in one go
pub const MAX_LEN: usize = u16::MAX as usize;

/// A forward transfer driven by two DMA channels
pub struct DmaLink<'c, A, B, TX, RX, CS, R> {
    a: A,
    b: B,
    tx: TX,
    rx: RX,
    cursor: &'c Cursor,
    cs: CS,
    relax: R,
    mode: Mode,
    divider: Divider,
}

impl<'c, A, B, TX, RX, CS, R> DmaLink<'c, A, B, TX, RX, CS, R>
where
    A: HalfDuplexDma,
    B: HalfDuplexDma,
    TX: Channel,
    RX: Channel,
    CS: OutputPin,
    R: Relax,
{
    /// `tx` must serve A's transmit requests, `rx` B's receive requests.
    pub fn new(a: A, b: B, tx: TX, rx: RX, cursor: &'c Cursor, cs: CS, relax: R) -> Self {
        let defaults = LinkConfig::default();
        DmaLink {
            a,
            b,
            tx,
            rx,
            cursor,
            cs,
            relax,
            mode: defaults.mode,
            divider: defaults.divider,
        }
    }

    /// Clock polarity, phase and rate used for both endpoints
    pub fn with_clock(mut self, mode: Mode, divider: Divider) -> Self {
        self.mode = mode;
        self.divider = divider;
        self
    }

    /// Release the select line so the slave starts out deselected
    pub fn idle(&mut self) -> Result<(), Error<CS::Error>> {
        self.cs.set_high().map_err(Error::Select)
    }

    /// Send `outbound` from A to B, landing in `inbound`
    ///
    /// Both buffers must have the same length, at most [`MAX_LEN`]. They are
    /// returned together with the comparison once the transfer is over.
    pub fn forward<OB, IB>(&mut self, outbound: OB, mut inbound: IB) -> Result<(PhaseResult, OB, IB), Error<CS::Error>>
    where
        OB: ReadBuffer<Word = u8>,
        IB: WriteBuffer<Word = u8>,
    {
        // NOTE(unsafe) both buffers are owned here until the channels are stopped
        let (src, len) = unsafe { outbound.read_buffer() };
        let (dst, rx_len) = unsafe { inbound.write_buffer() };
        if len != rx_len || len > MAX_LEN {
            return Err(Error::Length);
        }

        self.prepare(len);
        // NOTE(unsafe) `dst` is valid for `len` bytes and no channel is running
        unsafe { dst.write_bytes(0, len) };
        unsafe {
            self.rx
                .configure(self.b.data_register(), dst, len, DmaDirection::PeripheralToMemory);
            self.tx
                .configure(self.a.data_register(), src as *mut u8, len, DmaDirection::MemoryToPeripheral);
        }
        compiler_fence(Ordering::Release);

        let moved = self.run(len);
        self.finish();
        compiler_fence(Ordering::Acquire);
        moved?;

        // NOTE(unsafe) both channels are stopped, the buffers are ours again
        let (sent, received) = unsafe { (slice::from_raw_parts(src, len), slice::from_raw_parts(dst, len)) };
        let result = verify(received, sent);
        debug!("dma forward done: {}", result);
        Ok((result, outbound, inbound))
    }

    /// Quiesce both endpoints and configure them for the forward direction
    fn prepare(&mut self, len: usize) {
        self.a.disable();
        self.b.disable();
        for event in [Event::Txe, Event::Rxne] {
            self.a.unlisten(event);
            self.a.disable_dma(event);
            self.b.unlisten(event);
            self.b.disable_dma(event);
        }
        self.tx.stop();
        self.rx.stop();
        self.cursor.reset();

        let config = LinkConfig::default().mode(self.mode).divider(self.divider);
        self.a.configure(&config.endpoint(EndpointRole::master_transmitter()));
        self.b.configure(&config.endpoint(EndpointRole::slave_receiver()));
        trace!("dma forward of {=usize} bytes", len);
    }

    fn run(&mut self, len: usize) -> Result<(), Error<CS::Error>> {
        // receive requests and both channels first, transmit requests last
        self.b.enable_dma(Event::Rxne);
        self.rx.start();
        self.tx.start();
        self.a.enable_dma(Event::Txe);

        // start communication: the master pulls the select line low
        self.cs.set_low().map_err(Error::Select)?;
        self.b.enable();
        self.a.enable();

        while !self.tx.is_complete() {
            self.cursor.set_tx(len - self.tx.remaining());
            self.relax.relax();
        }
        self.cursor.set_tx(len);

        while !self.rx.is_complete() {
            self.cursor.set_rx(len - self.rx.remaining());
            self.relax.relax();
        }
        self.cursor.set_rx(len);

        while self.a.is_busy() || self.b.is_busy() {
            self.relax.relax();
        }

        self.cs.set_high().map_err(Error::Select)
    }

    fn finish(&mut self) {
        self.tx.stop();
        self.rx.stop();
        self.a.disable_dma(Event::Txe);
        self.b.disable_dma(Event::Rxne);
        self.a.disable();
        self.b.disable();
    }

    pub fn release(self) -> (A, B, TX, RX, CS) {
        (self.a, self.b, self.tx, self.rx, self.cs)
    }
}

/// Extension trait to split the DMA controller into the SPI channels
#[cfg(feature = "device-selected")]
pub trait DmaExt {
    fn split(self, rcc: &RCC) -> Channels;
}

/// DMA1 channels with a fixed SPI request mapping
#[cfg(feature = "device-selected")]
pub struct Channels {
    /// SPI1 receive
    pub c2: C2,
    /// SPI1 transmit
    pub c3: C3,
    /// SPI2 receive
    pub c4: C4,
    /// SPI2 transmit
    pub c5: C5,
}

#[cfg(feature = "device-selected")]
impl DmaExt for DMA1 {
    fn split(self, rcc: &RCC) -> Channels {
        // DMAEN
        rcc.ahbenr.modify(|r, w| unsafe { w.bits(r.bits() | 1) });
        Channels {
            c2: C2 { _0: () },
            c3: C3 { _0: () },
            c4: C4 { _0: () },
            c5: C5 { _0: () },
        }
    }
}

// Register offsets (RM0091, DMA register map)
#[cfg(feature = "device-selected")]
mod regs {
    pub const ISR: usize = 0x00;
    pub const IFCR: usize = 0x04;
    pub const CCR: usize = 0x08;
    pub const CNDTR: usize = 0x0c;
    pub const CPAR: usize = 0x10;
    pub const CMAR: usize = 0x14;
    pub const STRIDE: usize = 20;

    pub const CCR_EN: u32 = 1 << 0;
    pub const CCR_DIR: u32 = 1 << 4;
    pub const CCR_MINC: u32 = 1 << 7;
    pub const CCR_PL_MEDIUM: u32 = 0b01 << 12;
}

macro_rules! dma_channel {
    ($($C:ident: $n:expr,)+) => {
        $(
            #[cfg(feature = "device-selected")]
            pub struct $C {
                _0: (),
            }

            #[cfg(feature = "device-selected")]
            impl $C {
                fn reg(&self, offset: usize) -> *mut u32 {
                    (DMA1::ptr() as usize + offset) as *mut u32
                }

                fn channel_reg(&self, offset: usize) -> *mut u32 {
                    self.reg(offset + regs::STRIDE * ($n - 1))
                }
            }

            #[cfg(feature = "device-selected")]
            impl Channel for $C {
                unsafe fn configure(&mut self, peripheral: usize, memory: *mut u8, len: usize, direction: DmaDirection) {
                    let dir = match direction {
                        DmaDirection::MemoryToPeripheral => regs::CCR_DIR,
                        DmaDirection::PeripheralToMemory => 0,
                    };
                    // NOTE(write_volatile) CCR is written with EN clear first, the
                    // other channel registers are only writable while disabled
                    self.channel_reg(regs::CCR).write_volatile(0);
                    self.reg(regs::IFCR).write_volatile(0b1111 << (4 * ($n - 1)));
                    self.channel_reg(regs::CPAR).write_volatile(peripheral as u32);
                    self.channel_reg(regs::CMAR).write_volatile(memory as u32);
                    self.channel_reg(regs::CNDTR).write_volatile(len as u32);
                    // 8-bit memory and peripheral size
                    self.channel_reg(regs::CCR).write_volatile(regs::CCR_MINC | regs::CCR_PL_MEDIUM | dir);
                }

                fn start(&mut self) {
                    unsafe {
                        let ccr = self.channel_reg(regs::CCR);
                        ccr.write_volatile(ccr.read_volatile() | regs::CCR_EN);
                    }
                }

                fn stop(&mut self) {
                    unsafe {
                        let ccr = self.channel_reg(regs::CCR);
                        ccr.write_volatile(ccr.read_volatile() & !regs::CCR_EN);
                    }
                }

                fn remaining(&self) -> usize {
                    unsafe { (self.channel_reg(regs::CNDTR).read_volatile() & 0xffff) as usize }
                }

                fn is_complete(&self) -> bool {
                    // TCIFx
                    unsafe { self.reg(regs::ISR).read_volatile() & (1 << (4 * ($n - 1) + 1)) != 0 }
                }
            }
        )+
    }
}

dma_channel! {
    C2: 2,
    C3: 3,
    C4: 4,
    C5: 5,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Call, SelectPin, SimChannel, SimSpi, Wire};

    const N: usize = 32;

    fn outbound() -> &'static [u8] {
        Box::leak((0..N as u8).map(|i| 0x01 + i).collect::<Vec<_>>().into_boxed_slice())
    }

    fn inbound(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0xee; len].into_boxed_slice())
    }

    type Link<'c, R> = DmaLink<'c, SimSpi, SimSpi, SimChannel, SimChannel, SelectPin, R>;

    fn link<'c>(wire: &Wire, cursor: &'c Cursor) -> Link<'c, impl FnMut()> {
        let a = wire.endpoint();
        let b = wire.endpoint();
        let tx = wire.channel(&a);
        let rx = wire.channel(&b);
        let clock = wire.clone();
        let mut budget = 10_000usize;
        let relax = move || {
            budget = budget.checked_sub(1).expect("link stalled");
            clock.clock();
        };
        let mut link = DmaLink::new(a, b, tx, rx, cursor, wire.select(), relax);
        link.idle().unwrap();
        link
    }

    #[test]
    fn dma_forward_delivers_the_buffer() {
        let wire = Wire::new();
        let cursor = Cursor::new();
        let mut link = link(&wire, &cursor);

        let (result, sent, received) = link.forward(outbound(), inbound(N)).unwrap();

        assert_eq!(result, PhaseResult::Match);
        assert_eq!(received, sent);
        assert_eq!((cursor.tx(), cursor.rx()), (N, N));
        assert!(!wire.is_selected());
        assert_eq!(wire.busy_at_release(), vec![false]);

        let (a, b, tx, rx, _) = link.release();
        assert_eq!(a.role(), Some(EndpointRole::master_transmitter()));
        assert_eq!(b.role(), Some(EndpointRole::slave_receiver()));
        assert!(!a.is_enabled() && !b.is_enabled());
        assert!(!tx.is_running() && !rx.is_running());
        assert_eq!(tx.remaining(), 0);
    }

    #[test]
    fn dma_requests_replace_interrupts() {
        let wire = Wire::new();
        let cursor = Cursor::new();
        let mut link = link(&wire, &cursor);

        link.forward(outbound(), inbound(N)).unwrap();

        let (a, b, ..) = link.release();
        let (log_a, log_b) = (a.log(), b.log());
        assert!(log_a.contains(&Call::EnableDma(Event::Txe)));
        assert!(log_b.contains(&Call::EnableDma(Event::Rxne)));
        assert!(!log_a.iter().chain(log_b.iter()).any(|c| matches!(c, Call::Listen(_))));
        assert_eq!(log_a.last(), Some(&Call::Disable));
        assert_eq!(a.sent().len(), N);
    }

    #[test]
    fn dma_corrupted_byte_is_a_mismatch() {
        let wire = Wire::new();
        let cursor = Cursor::new();
        let mut link = link(&wire, &cursor);
        wire.corrupt(0, 15, 0x80);

        let (result, sent, received) = link.forward(outbound(), inbound(N)).unwrap();

        assert_eq!(result, PhaseResult::Mismatch);
        assert_eq!(received[15], sent[15] ^ 0x80);
        assert_eq!(received[16..], sent[16..]);
    }

    #[test]
    fn dma_buffers_of_different_length_are_rejected() {
        let wire = Wire::new();
        let cursor = Cursor::new();
        let mut link = link(&wire, &cursor);

        let result = link.forward(outbound(), inbound(N - 1));

        assert!(matches!(result, Err(Error::Length)));
        let (a, b, ..) = link.release();
        assert!(a.log().is_empty() && b.log().is_empty());
    }
}
