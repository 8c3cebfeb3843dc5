//! Pin setup for the link: select line, SPI signals and indicator LEDs
//!
//! Pins are handed out by index from a clocked [`Port`]; the caller keeps
//! them unique.

use core::convert::Infallible;
use core::marker::PhantomData;

use critical_section::CriticalSection;
use embedded_hal::digital::v2::OutputPin;

use crate::pac::{GPIOA, GPIOB, GPIOC, RCC};

/// Extension trait to clock a GPIO peripheral and hand out its pins
pub trait GpioExt {
    fn constrain(self, rcc: &RCC) -> Port;
}

trait GpioRegExt {
    fn set_high(&self, pos: u8);
    fn set_low(&self, pos: u8);
    fn set_mode(&self, pos: u8, mode: u32);
    fn set_pull(&self, pos: u8, pull: u32);
    fn set_push_pull(&self, pos: u8);
    fn set_alternate(&self, pos: u8, af: u32);
}

/// Not configured yet (type state)
pub struct Unconfigured;

/// Push pull output (type state)
pub struct Output;

/// Alternate function (type state)
pub struct Alternate;

/// A clocked GPIO port
pub struct Port {
    regs: *const dyn GpioRegExt,
}

impl Port {
    pub fn pin(&self, i: u8) -> Pin<Unconfigured> {
        debug_assert!(i < 16);
        Pin {
            i,
            port: self.regs,
            _mode: PhantomData,
        }
    }
}

/// Fully erased pin
pub struct Pin<MODE> {
    i: u8,
    port: *const dyn GpioRegExt,
    _mode: PhantomData<MODE>,
}

// NOTE(unsafe) The only write access is to BSRR, which is thread safe
unsafe impl<MODE> Sync for Pin<MODE> {}
// NOTE(unsafe) this only enables read access to the same pin from multiple
// threads
unsafe impl<MODE> Send for Pin<MODE> {}

impl<MODE> Pin<MODE> {
    fn into_mode<NEW>(self) -> Pin<NEW> {
        Pin {
            i: self.i,
            port: self.port,
            _mode: PhantomData,
        }
    }

    /// Configures the pin to operate as a push pull output
    pub fn into_push_pull_output(self, _cs: &CriticalSection) -> Pin<Output> {
        unsafe {
            (*self.port).set_pull(self.i, 0b00);
            (*self.port).set_push_pull(self.i);
            (*self.port).set_mode(self.i, 0b01);
        }
        self.into_mode()
    }

    /// Configures the pin to operate in alternate function `af`
    pub fn into_alternate(self, af: u8, _cs: &CriticalSection) -> Pin<Alternate> {
        unsafe {
            (*self.port).set_alternate(self.i, u32::from(af & 0b1111));
            (*self.port).set_mode(self.i, 0b10);
        }
        self.into_mode()
    }
}

impl OutputPin for Pin<Output> {
    type Error = Infallible;

    #[inline(always)]
    fn set_high(&mut self) -> Result<(), Self::Error> {
        unsafe { (*self.port).set_high(self.i) };
        Ok(())
    }

    #[inline(always)]
    fn set_low(&mut self) -> Result<(), Self::Error> {
        unsafe { (*self.port).set_low(self.i) };
        Ok(())
    }
}

macro_rules! gpio_trait {
    ($gpiox:ident) => {
        impl GpioRegExt for crate::pac::$gpiox::RegisterBlock {
            fn set_high(&self, pos: u8) {
                // NOTE(unsafe) atomic write to a stateless register
                unsafe { self.bsrr.write(|w| w.bits(1 << pos)) }
            }

            fn set_low(&self, pos: u8) {
                // NOTE(unsafe) atomic write to a stateless register
                unsafe { self.bsrr.write(|w| w.bits(1 << (pos + 16))) }
            }

            fn set_mode(&self, pos: u8, mode: u32) {
                let offset = 2 * u32::from(pos);
                self.moder.modify(|r, w| unsafe {
                    w.bits((r.bits() & !(0b11 << offset)) | (mode << offset))
                });
            }

            fn set_pull(&self, pos: u8, pull: u32) {
                let offset = 2 * u32::from(pos);
                self.pupdr.modify(|r, w| unsafe {
                    w.bits((r.bits() & !(0b11 << offset)) | (pull << offset))
                });
            }

            fn set_push_pull(&self, pos: u8) {
                self.otyper.modify(|r, w| unsafe { w.bits(r.bits() & !(1 << pos)) });
            }

            fn set_alternate(&self, pos: u8, af: u32) {
                let offset = 4 * u32::from(pos);
                if offset < 32 {
                    self.afrl.modify(|r, w| unsafe {
                        w.bits((r.bits() & !(0b1111 << offset)) | (af << offset))
                    });
                } else {
                    let offset = offset - 32;
                    self.afrh.modify(|r, w| unsafe {
                        w.bits((r.bits() & !(0b1111 << offset)) | (af << offset))
                    });
                }
            }
        }
    };
}

gpio_trait!(gpioa);
gpio_trait!(gpiof);

macro_rules! gpio {
    ($($GPIOX:ident: $iopxen:ident,)+) => {
        $(
            impl GpioExt for $GPIOX {
                fn constrain(self, rcc: &RCC) -> Port {
                    rcc.ahbenr.modify(|_, w| w.$iopxen().set_bit());
                    Port {
                        regs: $GPIOX::ptr() as *const dyn GpioRegExt,
                    }
                }
            }
        )+
    }
}

gpio! {
    GPIOA: iopaen,
    GPIOB: iopben,
    GPIOC: iopcen,
}
