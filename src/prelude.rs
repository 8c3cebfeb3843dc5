pub use embedded_hal::prelude::*;

#[cfg(feature = "device-selected")]
pub use crate::dma::DmaExt as _spi_halfduplex_switch_dma_DmaExt;
#[cfg(feature = "device-selected")]
pub use crate::gpio::GpioExt as _spi_halfduplex_switch_gpio_GpioExt;
pub use crate::halfduplex::HalfDuplexDma as _spi_halfduplex_switch_halfduplex_HalfDuplexDma;
pub use crate::halfduplex::HalfDuplex as _spi_halfduplex_switch_halfduplex_HalfDuplex;
pub use crate::indicator::Indicator as _spi_halfduplex_switch_indicator_Indicator;
pub use crate::switch::Relax as _spi_halfduplex_switch_switch_Relax;
pub use crate::time::U32Ext as _spi_halfduplex_switch_time_U32Ext;
