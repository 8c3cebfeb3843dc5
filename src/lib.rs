//! Interrupt driven half-duplex SPI link with master/slave role switching
//!
//! Two SPI peripherals share one data line. During the first phase endpoint A
//! clocks its buffer out to endpoint B, then both peripherals are reconfigured
//! and B sends its buffer back to A over the same wiring. Each received buffer
//! is compared against the buffer that produced it.
//!
//! The byte transfers happen in the SPI interrupt handlers ([`pump`]), the phase
//! sequencing happens in the foreground ([`switch`]). Both sides talk to the
//! peripherals through the [`halfduplex::HalfDuplex`] trait, which the STM32F0
//! driver in [`spi`] implements. [`dma`] moves a whole buffer from A to B with
//! two DMA channels instead of the interrupt pump.
//!
//! # Features
//!
//! * one of the device features (`stm32f030`, `stm32f042`, `stm32f072`, ...)
//!   enables the register level driver in [`spi`] and [`gpio`]
//! * `rt` enables the device interrupt vectors and a single core critical section
//! * `defmt` enables logging through [`defmt`](https://docs.rs/defmt)

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

#[cfg(feature = "device-selected")]
pub use stm32f0;

#[cfg(any(feature = "stm32f030", feature = "stm32f070"))]
pub use stm32f0::stm32f0x0 as pac;

#[cfg(any(feature = "stm32f031", feature = "stm32f051", feature = "stm32f071", feature = "stm32f091"))]
pub use stm32f0::stm32f0x1 as pac;

#[cfg(any(feature = "stm32f042", feature = "stm32f072"))]
pub use stm32f0::stm32f0x2 as pac;

#[cfg(any(
    feature = "stm32f038",
    feature = "stm32f048",
    feature = "stm32f058",
    feature = "stm32f078",
    feature = "stm32f098",
))]
pub use stm32f0::stm32f0x8 as pac;

pub mod dma;
#[cfg(feature = "device-selected")]
pub mod gpio;
pub mod halfduplex;
pub mod indicator;
pub mod link;
pub mod prelude;
pub mod pump;
#[cfg(feature = "device-selected")]
pub mod spi;
pub mod switch;
pub mod time;

#[cfg(test)]
mod sim;
