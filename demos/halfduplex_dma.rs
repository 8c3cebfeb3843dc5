//! DMA fed transfer on an STM32F072B-DISCO
//!
//! Same wiring as `halfduplex_switch`, SPI1 sends and SPI2 receives:
//!
//! * PA4 (select, GPIO) -> PB12 (SPI2 NSS)
//! * PA5 (SPI1 SCK)     -> PB13 (SPI2 SCK)
//! * PA7 (SPI1 MOSI)    -> PB14 (SPI2 MISO)
//!
//! DMA1 channel 3 feeds SPI1, channel 4 drains SPI2. The red LED is lit while
//! the transfer runs, green means the buffer arrived intact, orange means it
//! did not.
#![no_main]
#![no_std]

#[cfg(feature = "defmt")]
use defmt_rtt as _;
use panic_halt as _;

use spi_halfduplex_switch as hal;

use crate::hal::dma::DmaLink;
use crate::hal::indicator::Leds;
use crate::hal::link::{Cursor, PhaseResult};
use crate::hal::pac;
use crate::hal::prelude::*;
use crate::hal::spi::Spi;
use crate::hal::switch::{Report, Spin};

use cortex_m_rt::entry;

const N: usize = 32;

static TX_A: [u8; N] = counting(0x01);
static CURSOR: Cursor = Cursor::new();

const fn counting(first: u8) -> [u8; N] {
    let mut buf = [0; N];
    let mut i = 0;
    while i < N {
        buf[i] = first.wrapping_add(i as u8);
        i += 1;
    }
    buf
}

#[entry]
fn main() -> ! {
    if let (Some(p), Some(rx)) = (pac::Peripherals::take(), cortex_m::singleton!(: [u8; N] = [0; N])) {
        let gpioa = p.GPIOA.constrain(&p.RCC);
        let gpiob = p.GPIOB.constrain(&p.RCC);
        let gpioc = p.GPIOC.constrain(&p.RCC);
        let channels = p.DMA1.split(&p.RCC);

        let (select, mut leds) = critical_section::with(|cs| {
            let _ = gpioa.pin(5).into_alternate(0, &cs);
            let _ = gpioa.pin(7).into_alternate(0, &cs);
            let _ = gpiob.pin(12).into_alternate(0, &cs);
            let _ = gpiob.pin(13).into_alternate(0, &cs);
            let _ = gpiob.pin(14).into_alternate(0, &cs);

            let select = gpioa.pin(4).into_push_pull_output(&cs);
            let leds = Leds::new(
                gpioc.pin(6).into_push_pull_output(&cs),
                gpioc.pin(9).into_push_pull_output(&cs),
                gpioc.pin(8).into_push_pull_output(&cs),
            );
            (select, leds)
        });

        let master = Spi::spi1(p.SPI1, &p.RCC);
        let slave = Spi::spi2(p.SPI2, &p.RCC);

        let mut link = DmaLink::new(master, slave, channels.c3, channels.c4, &CURSOR, select, Spin);
        link.idle().ok();
        leds.start().ok();

        let inbound: &'static mut [u8] = rx;
        if let Ok((forward, _, _)) = link.forward(&TX_A[..], inbound) {
            // there is no reverse phase, only the forward result counts
            leds.report(&Report {
                forward,
                reverse: PhaseResult::Match,
            })
            .ok();
        }
    }

    loop {
        cortex_m::asm::nop();
    }
}
