//! Half-duplex transport boundary
//!
//! A half-duplex endpoint is one SPI peripheral wired in one-line
//! bidirectional mode: at any time it either drives the data line
//! ([`Direction::Transmit`]) or samples it ([`Direction::Receive`]). The
//! [`HalfDuplex`] trait is everything the interrupt pump and the role switch
//! need from such a peripheral.

pub use embedded_hal::spi::{Mode, Phase, Polarity};

use crate::time::Hertz;

/// Which side generates the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Generates the clock
    Master,
    /// Follows the clock of the master
    Slave,
}

/// Which way the data line is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// The endpoint drives the data line
    Transmit,
    /// The endpoint samples the data line
    Receive,
}

/// How the select line of an endpoint is managed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipSelect {
    /// Firmware toggles a GPIO, the peripheral ignores its NSS pin
    Software,
    /// The peripheral's NSS pin is used
    Hardware,
}

/// Interrupt event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Transmit buffer empty, a new byte can be written
    Txe,
    /// Receive buffer not empty, a byte can be read
    Rxne,
}

/// Baud rate prescaler applied to the peripheral clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Divider {
    Div2,
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
    Div256,
}

impl Divider {
    /// Smallest prescaler whose resulting clock does not exceed `speed`
    pub fn from_ratio(pclk: Hertz, speed: Hertz) -> Self {
        if speed.0 == 0 {
            return Divider::Div256;
        }
        let ratio = pclk.0 / speed.0 + u32::from(pclk.0 % speed.0 != 0);
        match ratio {
            0..=2 => Divider::Div2,
            3..=4 => Divider::Div4,
            5..=8 => Divider::Div8,
            9..=16 => Divider::Div16,
            17..=32 => Divider::Div32,
            33..=64 => Divider::Div64,
            65..=128 => Divider::Div128,
            _ => Divider::Div256,
        }
    }

    /// Value of the BR field
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Resulting link clock for a given peripheral clock
    pub fn apply(self, pclk: Hertz) -> Hertz {
        Hertz(pclk.0 >> (self.bits() + 1))
    }
}

/// What one endpoint does during a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointRole {
    pub role: Role,
    pub direction: Direction,
    pub chip_select: ChipSelect,
}

impl EndpointRole {
    /// Clock master driving the data line, select line toggled by firmware
    pub const fn master_transmitter() -> Self {
        EndpointRole {
            role: Role::Master,
            direction: Direction::Transmit,
            chip_select: ChipSelect::Software,
        }
    }

    /// Clock master sampling the data line, select line toggled by firmware
    pub const fn master_receiver() -> Self {
        EndpointRole {
            role: Role::Master,
            direction: Direction::Receive,
            chip_select: ChipSelect::Software,
        }
    }

    /// Slave driving the data line while its NSS pin is low
    pub const fn slave_transmitter() -> Self {
        EndpointRole {
            role: Role::Slave,
            direction: Direction::Transmit,
            chip_select: ChipSelect::Hardware,
        }
    }

    /// Slave sampling the data line while its NSS pin is low
    pub const fn slave_receiver() -> Self {
        EndpointRole {
            role: Role::Slave,
            direction: Direction::Receive,
            chip_select: ChipSelect::Hardware,
        }
    }

    /// The interrupt source this endpoint is serviced by
    pub fn event(&self) -> Event {
        match self.direction {
            Direction::Transmit => Event::Txe,
            Direction::Receive => Event::Rxne,
        }
    }
}

/// Complete peripheral configuration for one endpoint
///
/// Frames are always 8 bit, most significant bit first.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub endpoint: EndpointRole,
    pub mode: Mode,
    pub divider: Divider,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            endpoint: EndpointRole::master_transmitter(),
            mode: Mode {
                polarity: Polarity::IdleLow,
                phase: Phase::CaptureOnSecondTransition,
            },
            divider: Divider::Div256,
        }
    }
}

impl LinkConfig {
    pub fn endpoint(mut self, endpoint: EndpointRole) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn divider(mut self, divider: Divider) -> Self {
        self.divider = divider;
        self
    }

    /// Pick the divider from the peripheral clock and the wanted link speed
    pub fn speed<F>(self, pclk: Hertz, speed: F) -> Self
    where
        F: Into<Hertz>,
    {
        self.divider(Divider::from_ratio(pclk, speed.into()))
    }
}

/// A peripheral that can act as one end of a half-duplex link
pub trait HalfDuplex {
    /// Transport error reported by `send` and `read`
    type Error;

    /// Apply a configuration. Must only be called while disabled.
    fn configure(&mut self, config: &LinkConfig);

    /// Start the peripheral
    fn enable(&mut self);

    /// Stop the peripheral
    fn disable(&mut self);

    fn is_enabled(&self) -> bool;

    /// Start listening for an interrupt event
    fn listen(&mut self, event: Event);

    /// Stop listening for an interrupt event
    fn unlisten(&mut self, event: Event);

    /// The event's flag is set and the event is being listened for
    fn is_pending(&self, event: Event) -> bool;

    /// A frame is still being shifted
    fn is_busy(&self) -> bool;

    /// Write a byte to the transmit buffer
    fn send(&mut self, byte: u8) -> nb::Result<(), Self::Error>;

    /// Take a byte from the receive buffer
    fn read(&mut self) -> nb::Result<u8, Self::Error>;

    /// The receive buffer may only be read while the peripheral is disabled
    ///
    /// Endpoints reporting `true` get a disable/enable bracket around every
    /// read and stay disabled after the last byte of a phase.
    fn read_workaround(&self) -> bool {
        false
    }
}

/// A [`HalfDuplex`] peripheral whose data register can be fed by a DMA channel
pub trait HalfDuplexDma: HalfDuplex {
    /// Raise a DMA request instead of waiting for software on `event`
    fn enable_dma(&mut self, event: Event);

    fn disable_dma(&mut self, event: Event);

    /// Address of the data register, the peripheral side of a transfer
    fn data_register(&self) -> usize;
}
