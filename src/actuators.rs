//! Output-side breakouts. Unlike sensors these are not polled by the hub;
//! callers drive them directly on an opened bus.

pub mod drv8825;
pub mod lcd_i2c;
pub mod mcp23017;
pub mod ws2812;

pub use drv8825::{Direction, Drv8825, StepperPins};
pub use lcd_i2c::LcdI2c;
pub use mcp23017::{ExpanderSetup, Mcp23017, PinMode, PinSetup};
pub use ws2812::Ws2812;
