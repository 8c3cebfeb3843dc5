//! Role switch on an STM32F072B-DISCO
//!
//! Wiring, SPI1 is endpoint A and SPI2 is endpoint B:
//!
//! * PA4 (select, GPIO) -> PB12 (SPI2 NSS)
//! * PA5 (SPI1 SCK)     -> PB13 (SPI2 SCK)
//! * PA7 (SPI1 MOSI)    -> PB14 (SPI2 MISO)
//!
//! The red LED is lit while the run is in progress, green means both
//! buffers arrived intact, orange means at least one did not.
#![no_main]
#![no_std]

#[cfg(feature = "defmt")]
use defmt_rtt as _;
use panic_halt as _;

use spi_halfduplex_switch as hal;

use crate::hal::indicator::Leds;
use crate::hal::link::Cursor;
use crate::hal::pac::{self, interrupt, Interrupt, SPI1, SPI2};
use crate::hal::prelude::*;
use crate::hal::pump::{Endpoint, SharedEndpoint};
use crate::hal::spi::Spi;
use crate::hal::switch::{RoleSwitch, Spin};

use cortex_m::peripheral::NVIC;
use cortex_m_rt::entry;

const N: usize = 32;

static TX_A: [u8; N] = counting(0x01);
static TX_B: [u8; N] = counting(0x51);

static CURSOR: Cursor = Cursor::new();
static MASTER: SharedEndpoint<'static, Spi<SPI1>, N> = SharedEndpoint::new();
static SLAVE: SharedEndpoint<'static, Spi<SPI2>, N> = SharedEndpoint::new();

const fn counting(first: u8) -> [u8; N] {
    let mut buf = [0; N];
    let mut i = 0;
    while i < N {
        buf[i] = first.wrapping_add(i as u8);
        i += 1;
    }
    buf
}

#[interrupt]
fn SPI1() {
    MASTER.on_interrupt();
}

#[interrupt]
fn SPI2() {
    SLAVE.on_interrupt();
}

#[entry]
fn main() -> ! {
    if let Some(p) = pac::Peripherals::take() {
        let gpioa = p.GPIOA.constrain(&p.RCC);
        let gpiob = p.GPIOB.constrain(&p.RCC);
        let gpioc = p.GPIOC.constrain(&p.RCC);

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

        let master = Spi::spi1(p.SPI1, &p.RCC).with_read_workaround(true);
        let slave = Spi::spi2(p.SPI2, &p.RCC);
        MASTER.install(Endpoint::new(master, &TX_A, &CURSOR));
        SLAVE.install(Endpoint::new(slave, &TX_B, &CURSOR));

        // NOTE(unsafe) the handlers only touch state behind the shared endpoints
        unsafe {
            NVIC::unmask(Interrupt::SPI1);
            NVIC::unmask(Interrupt::SPI2);
        }

        let mut switch = RoleSwitch::new(&MASTER, &SLAVE, &CURSOR, select, Spin);
        switch.idle().ok();
        leds.start().ok();

        if let Ok(report) = switch.run() {
            leds.report(&report).ok();
        }
    }

    loop {
        cortex_m::asm::nop();
    }
}
