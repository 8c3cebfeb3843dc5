//! Half-duplex driver for the integrated SPI peripherals
//!
//! The peripheral is used in one-line bidirectional mode (`BIDIMODE`): the
//! master's MOSI pin is wired to the slave's MISO pin and `BIDIOE` selects
//! whether an endpoint drives or samples that line. Only 8-bit frames, MSB
//! first, are supported.
//!
//! # Example
//! Send a byte from SPI1 (master) to SPI2 (slave)
//! ``` no_run
//! use spi_halfduplex_switch as hal;
//!
//! use hal::halfduplex::{EndpointRole, HalfDuplex, LinkConfig};
//! use hal::pac;
//! use hal::spi::Spi;
//!
//! let p = pac::Peripherals::take().unwrap();
//!
//! let mut master = Spi::spi1(p.SPI1, &p.RCC);
//! let mut slave = Spi::spi2(p.SPI2, &p.RCC);
//!
//! master.configure(&LinkConfig::default());
//! slave.configure(&LinkConfig::default().endpoint(EndpointRole::slave_receiver()));
//!
//! slave.enable();
//! master.enable();
//! nb::block!(master.send(0x5a)).ok();
//! let byte = nb::block!(slave.read());
//! ```

use core::{ops::Deref, ptr};

use crate::halfduplex::{ChipSelect, Direction, Event, HalfDuplex, HalfDuplexDma, LinkConfig, Phase, Polarity, Role};
use crate::pac::RCC;

use crate::pac::SPI1;
#[cfg(any(
    feature = "stm32f030x8",
    feature = "stm32f030xc",
    feature = "stm32f042",
    feature = "stm32f048",
    feature = "stm32f051",
    feature = "stm32f058",
    feature = "stm32f070xb",
    feature = "stm32f071",
    feature = "stm32f072",
    feature = "stm32f078",
    feature = "stm32f091",
    feature = "stm32f098",
))]
use crate::pac::SPI2;

/// SPI error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Overrun occurred
    Overrun,
    /// Mode fault occurred
    ModeFault,
    /// CRC error
    Crc,
}

/// One SPI peripheral used as a half-duplex endpoint
pub struct Spi<SPI> {
    spi: SPI,
    read_workaround: bool,
}

macro_rules! spi {
    ($($SPI:ident: ($spi:ident, $spiXen:ident, $spiXrst:ident, $apbenr:ident, $apbrstr:ident),)+) => {
        $(
            impl Spi<$SPI> {
                /// Clocks and resets the peripheral. It stays disabled until configured.
                pub fn $spi(spi: $SPI, rcc: &RCC) -> Self {
                    /* Enable clock for SPI */
                    rcc.$apbenr.modify(|_, w| w.$spiXen().set_bit());

                    /* Reset SPI */
                    rcc.$apbrstr.modify(|_, w| w.$spiXrst().set_bit());
                    rcc.$apbrstr.modify(|_, w| w.$spiXrst().clear_bit());

                    Spi {
                        spi,
                        read_workaround: false,
                    }
                }
            }
        )+
    }
}

spi! {
    SPI1: (spi1, spi1en, spi1rst, apb2enr, apb2rstr),
}
#[cfg(any(
    feature = "stm32f030x8",
    feature = "stm32f030xc",
    feature = "stm32f042",
    feature = "stm32f048",
    feature = "stm32f051",
    feature = "stm32f058",
    feature = "stm32f070xb",
    feature = "stm32f071",
    feature = "stm32f072",
    feature = "stm32f078",
    feature = "stm32f091",
    feature = "stm32f098",
))]
spi! {
    SPI2: (spi2, spi2en, spi2rst, apb1enr, apb1rstr),
}

// It's needed for the impls, but rustc doesn't recognize that
#[allow(dead_code)]
type SpiRegisterBlock = crate::pac::spi1::RegisterBlock;

impl<SPI> Spi<SPI>
where
    SPI: Deref<Target = SpiRegisterBlock>,
{
    /// Bracket every read with a disable/enable
    ///
    /// A master in receive-only mode generates clocks for as long as it is
    /// enabled; stopping it around the read keeps it from clocking in a frame
    /// nobody is waiting for.
    pub fn with_read_workaround(mut self, enabled: bool) -> Self {
        self.read_workaround = enabled;
        self
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    fn check_errors(&self) -> Result<(), Error> {
        let sr = self.spi.sr.read();
        if sr.ovr().bit_is_set() {
            // NOTE(read_volatile) DR then SR clears OVR
            unsafe { ptr::read_volatile(&self.spi.dr as *const _ as *const u8) };
            let _ = self.spi.sr.read();
            Err(Error::Overrun)
        } else if sr.modf().bit_is_set() {
            Err(Error::ModeFault)
        } else if sr.crcerr().bit_is_set() {
            Err(Error::Crc)
        } else {
            Ok(())
        }
    }
}

impl<SPI> HalfDuplex for Spi<SPI>
where
    SPI: Deref<Target = SpiRegisterBlock>,
{
    type Error = Error;

    fn configure(&mut self, config: &LinkConfig) {
        let endpoint = config.endpoint;
        let master = endpoint.role == Role::Master;
        let software = endpoint.chip_select == ChipSelect::Software;
        let transmit = endpoint.direction == Direction::Transmit;

        /* Make sure the SPI unit is disabled so we can configure it */
        self.spi.cr1.modify(|_, w| w.spe().clear_bit());

        // FRXTH: 8-bit threshold on RX FIFO
        // DS: 8-bit data size
        // SSOE: a master with hardware NSS drives its NSS pin
        // TXEIE, RXNEIE: cleared, the caller listens for what it needs
        //
        // NOTE(unsafe): DS reserved bit patterns are 0b0000, 0b0001, and 0b0010. 0b0111 is valid
        // (reference manual, pp 804)
        self.spi.cr2.write(|w| unsafe {
            w.frxth()
                .set_bit()
                .ds()
                .bits(0b0111)
                .ssoe()
                .bit(master && !software)
        });

        // mstr: clock master or slave
        // lsbfirst: MSB first
        // ssm: software slave management, NSS pin free for other uses
        // ssi: internal NSS level, high for a master, low selects a slave
        // bidimode: 1-line bidirectional
        // bidioe: drive the line when transmitting
        // spe: stays off until `enable`
        self.spi.cr1.write(|w| {
            w.cpha()
                .bit(config.mode.phase == Phase::CaptureOnSecondTransition)
                .cpol()
                .bit(config.mode.polarity == Polarity::IdleHigh)
                .mstr()
                .bit(master)
                .br()
                .bits(config.divider.bits())
                .lsbfirst()
                .clear_bit()
                .ssm()
                .bit(software)
                .ssi()
                .bit(software && master)
                .rxonly()
                .clear_bit()
                .bidimode()
                .set_bit()
                .bidioe()
                .bit(transmit)
                .spe()
                .clear_bit()
        });
    }

    fn enable(&mut self) {
        self.spi.cr1.modify(|_, w| w.spe().set_bit());
    }

    fn disable(&mut self) {
        self.spi.cr1.modify(|_, w| w.spe().clear_bit());
    }

    fn is_enabled(&self) -> bool {
        self.spi.cr1.read().spe().bit_is_set()
    }

    fn listen(&mut self, event: Event) {
        match event {
            Event::Txe => self.spi.cr2.modify(|_, w| w.txeie().set_bit()),
            Event::Rxne => self.spi.cr2.modify(|_, w| w.rxneie().set_bit()),
        }
    }

    fn unlisten(&mut self, event: Event) {
        match event {
            Event::Txe => self.spi.cr2.modify(|_, w| w.txeie().clear_bit()),
            Event::Rxne => self.spi.cr2.modify(|_, w| w.rxneie().clear_bit()),
        }
    }

    fn is_pending(&self, event: Event) -> bool {
        let cr2 = self.spi.cr2.read();
        let sr = self.spi.sr.read();
        match event {
            Event::Txe => cr2.txeie().bit_is_set() && sr.txe().bit_is_set(),
            // an overrun also needs the handler so it gets cleared
            Event::Rxne => cr2.rxneie().bit_is_set() && (sr.rxne().bit_is_set() || sr.ovr().bit_is_set()),
        }
    }

    fn is_busy(&self) -> bool {
        self.spi.sr.read().bsy().bit_is_set()
    }

    fn send(&mut self, byte: u8) -> nb::Result<(), Error> {
        self.check_errors()?;

        if self.spi.sr.read().txe().bit_is_set() {
            // NOTE(write_volatile) 8-bit write that's not possible through the svd2rust API
            unsafe { ptr::write_volatile(self.spi.dr.as_ptr() as *mut u8, byte) }
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn read(&mut self) -> nb::Result<u8, Error> {
        self.check_errors()?;

        if self.spi.sr.read().rxne().bit_is_set() {
            // NOTE(read_volatile) read only 1 byte (the svd2rust API only allows
            // reading a half-word)
            Ok(unsafe { ptr::read_volatile(&self.spi.dr as *const _ as *const u8) })
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn read_workaround(&self) -> bool {
        self.read_workaround
    }
}

impl<SPI> HalfDuplexDma for Spi<SPI>
where
    SPI: Deref<Target = SpiRegisterBlock>,
{
    fn enable_dma(&mut self, event: Event) {
        match event {
            Event::Txe => self.spi.cr2.modify(|_, w| w.txdmaen().set_bit()),
            Event::Rxne => self.spi.cr2.modify(|_, w| w.rxdmaen().set_bit()),
        }
    }

    fn disable_dma(&mut self, event: Event) {
        match event {
            Event::Txe => self.spi.cr2.modify(|_, w| w.txdmaen().clear_bit()),
            Event::Rxne => self.spi.cr2.modify(|_, w| w.rxdmaen().clear_bit()),
        }
    }

    fn data_register(&self) -> usize {
        &self.spi.dr as *const _ as usize
    }
}
