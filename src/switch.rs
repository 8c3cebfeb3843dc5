//! Two phase role switch over one half-duplex link
//!
//! Phase one ([`Phase::Forward`]) sends A's buffer to B with A clocking and
//! transmitting. Phase two ([`Phase::Reverse`]) keeps A as the clock master
//! and owner of the select line but turns the data line around, so B sends
//! its buffer back to A.
//!
//! Every phase starts from the same quiesced state: both peripherals disabled,
//! both interrupt sources of both peripherals off, the cursor at zero and the
//! receiving endpoint's buffer cleared. A phase therefore behaves the same
//! whether or not another phase ran before it, and the buffer delivered by the
//! previous phase stays readable on the endpoint that got it.
//!
//! Completion is detected by spinning on the receive index that the interrupt
//! handlers advance. There is no timeout; a link that never delivers keeps
//! [`RoleSwitch::run`] spinning.

use embedded_hal::digital::v2::OutputPin;

use crate::halfduplex::{Direction, Divider, EndpointRole, HalfDuplex, LinkConfig, Mode, Role};
use crate::link::{Cursor, PhaseResult};
use crate::pump::SharedEndpoint;

/// Role switch error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<PinE> {
    /// An endpoint was not installed in its `SharedEndpoint`
    Detached,
    /// A role assignment without exactly one master and one transmitter
    Roles,
    /// Outbound and inbound buffers differ in length or are too long
    Length,
    /// Driving the select line failed
    Select(PinE),
}

/// Which way data flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// A sends to B
    Forward,
    /// B sends to A
    Reverse,
}

impl Phase {
    pub fn roles(self) -> Roles {
        match self {
            Phase::Forward => Roles {
                a: EndpointRole::master_transmitter(),
                b: EndpointRole::slave_receiver(),
            },
            // A keeps the clock and the select GPIO, B's NSS is a hardware input
            Phase::Reverse => Roles {
                a: EndpointRole::master_receiver(),
                b: EndpointRole::slave_transmitter(),
            },
        }
    }

    /// Wait for both busy flags to clear before releasing the select line
    ///
    /// A master in receive-only mode keeps clocking while enabled, its busy
    /// flag says nothing about the last frame, so the reverse phase releases
    /// the select line as soon as the last byte is in.
    pub fn drains_busy(self) -> bool {
        match self {
            Phase::Forward => true,
            Phase::Reverse => false,
        }
    }
}

/// Role of each endpoint during one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Roles {
    pub a: EndpointRole,
    pub b: EndpointRole,
}

impl Roles {
    /// Exactly one master and exactly one transmitter
    pub fn new<PinE>(a: EndpointRole, b: EndpointRole) -> Result<Self, Error<PinE>> {
        let roles = Roles { a, b };
        if roles.is_valid() {
            Ok(roles)
        } else {
            Err(Error::Roles)
        }
    }

    pub fn is_valid(&self) -> bool {
        (self.a.role == Role::Master) != (self.b.role == Role::Master)
            && (self.a.direction == Direction::Transmit) != (self.b.direction == Direction::Transmit)
    }

    /// Whether A receives during this phase
    pub fn a_receives(&self) -> bool {
        self.a.direction == Direction::Receive
    }
}

/// Result of a complete run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Report {
    pub forward: PhaseResult,
    pub reverse: PhaseResult,
}

impl Report {
    /// Both phases delivered their buffer unchanged
    pub fn passed(&self) -> bool {
        self.forward.is_match() && self.reverse.is_match()
    }
}

/// Called on every iteration of a busy wait
pub trait Relax {
    fn relax(&mut self);
}

impl<F> Relax for F
where
    F: FnMut(),
{
    fn relax(&mut self) {
        self()
    }
}

/// Busy wait with a `nop` per iteration
#[derive(Debug, Default, Clone, Copy)]
pub struct Spin;

impl Relax for Spin {
    fn relax(&mut self) {
        cortex_m::asm::nop();
    }
}

/// Drives the two phases over a pair of shared endpoints
pub struct RoleSwitch<'s, 'a, A, B, CS, R, const N: usize> {
    a: &'s SharedEndpoint<'a, A, N>,
    b: &'s SharedEndpoint<'a, B, N>,
    cursor: &'s Cursor,
    cs: CS,
    relax: R,
    mode: Mode,
    divider: Divider,
}

impl<'s, 'a, A, B, CS, R, const N: usize> RoleSwitch<'s, 'a, A, B, CS, R, N>
where
    A: HalfDuplex,
    B: HalfDuplex,
    CS: OutputPin,
    R: Relax,
{
    /// `cursor` must be the cursor both endpoints were created with.
    pub fn new(
        a: &'s SharedEndpoint<'a, A, N>,
        b: &'s SharedEndpoint<'a, B, N>,
        cursor: &'s Cursor,
        cs: CS,
        relax: R,
    ) -> Self {
        let defaults = LinkConfig::default();
        RoleSwitch {
            a,
            b,
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

    /// Run both phases, forward first
    pub fn run(&mut self) -> Result<Report, Error<CS::Error>> {
        let forward = self.forward()?;
        let reverse = self.reverse()?;
        let report = Report { forward, reverse };
        info!("role switch finished: {}", report);
        Ok(report)
    }

    /// A sends its buffer to B
    pub fn forward(&mut self) -> Result<PhaseResult, Error<CS::Error>> {
        self.phase(Phase::Forward)
    }

    /// B sends its buffer to A
    pub fn reverse(&mut self) -> Result<PhaseResult, Error<CS::Error>> {
        self.phase(Phase::Reverse)
    }

    /// Run one phase with the roles `phase` prescribes
    pub fn phase(&mut self, phase: Phase) -> Result<PhaseResult, Error<CS::Error>> {
        debug!("{} phase start", phase);
        let result = self.transfer(&phase.roles(), phase.drains_busy())?;
        debug!(
            "{} phase done: {}, {=usize} transport faults",
            phase,
            result,
            self.cursor.faults()
        );
        Ok(result)
    }

    /// Move one buffer across the link with the given roles
    ///
    /// With `drain_busy` the select line is only released once neither
    /// peripheral reports a frame in flight.
    pub fn transfer(&mut self, roles: &Roles, drain_busy: bool) -> Result<PhaseResult, Error<CS::Error>> {
        self.prepare(roles)?;

        // start communication: the master pulls the select line low
        self.cs.set_low().map_err(Error::Select)?;
        self.b.with(|ep| ep.driver_mut().enable()).ok_or(Error::Detached)?;
        self.a.with(|ep| ep.driver_mut().enable()).ok_or(Error::Detached)?;

        while self.cursor.rx() < N {
            self.relax.relax();
        }

        if drain_busy {
            while self.busy()? {
                self.relax.relax();
            }
        }

        self.cs.set_high().map_err(Error::Select)?;

        self.verify(roles)
    }

    /// Quiesce both endpoints and configure them for `roles`
    ///
    /// Only the receiving endpoint's inbound buffer is cleared, the other
    /// one keeps what it got in the previous phase.
    fn prepare(&mut self, roles: &Roles) -> Result<(), Error<CS::Error>> {
        if !roles.is_valid() {
            return Err(Error::Roles);
        }

        self.a.with(|ep| ep.quiesce()).ok_or(Error::Detached)?;
        self.b.with(|ep| ep.quiesce()).ok_or(Error::Detached)?;

        // no interrupt source is live, the handlers cannot touch the cursor
        self.cursor.reset();

        let config = LinkConfig::default().mode(self.mode).divider(self.divider);
        let a_receives = roles.a_receives();
        self.a
            .with(|ep| {
                if a_receives {
                    ep.clear();
                }
                ep.arm(&config.endpoint(roles.a));
            })
            .ok_or(Error::Detached)?;
        self.b
            .with(|ep| {
                if !a_receives {
                    ep.clear();
                }
                ep.arm(&config.endpoint(roles.b));
            })
            .ok_or(Error::Detached)?;
        Ok(())
    }

    fn busy(&self) -> Result<bool, Error<CS::Error>> {
        let a = self.a.with(|ep| ep.driver().is_busy()).ok_or(Error::Detached)?;
        let b = self.b.with(|ep| ep.driver().is_busy()).ok_or(Error::Detached)?;
        Ok(a || b)
    }

    fn verify(&self, roles: &Roles) -> Result<PhaseResult, Error<CS::Error>> {
        if roles.a_receives() {
            let sent = self.b.with(|ep| ep.outbound()).ok_or(Error::Detached)?;
            self.a.with(|ep| ep.verify(sent)).ok_or(Error::Detached)
        } else {
            let sent = self.a.with(|ep| ep.outbound()).ok_or(Error::Detached)?;
            self.b.with(|ep| ep.verify(sent)).ok_or(Error::Detached)
        }
    }

    /// Give back the select line and the relax hook
    pub fn release(self) -> (CS, R) {
        (self.cs, self.relax)
    }
}
