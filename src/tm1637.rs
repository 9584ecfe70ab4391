//! TM1637 4-digit LED driver, bit-banged over two GPIOs.
//!
//! The chip speaks an I2C-like two-wire protocol, but LSB first and without
//! an address byte. DIO has to be open-drain so the chip can pull it low to
//! acknowledge each byte.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::display::SegmentDisplay;
use crate::error::{ClockError, Result};

const CMD_DATA_AUTO_INCREMENT: u8 = 0x40;
const CMD_ADDRESS_FIRST_DIGIT: u8 = 0xC0;
const CMD_DISPLAY_CONTROL: u8 = 0x80;
const DISPLAY_ON: u8 = 0x08;

const SEG_COLON: u8 = 0x80;
const SEG_BLANK: u8 = 0x00;
//                       0     1     2     3     4     5     6     7     8     9
const SEG_DIGITS: [u8; 10] = [0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F];

const BIT_DELAY_US: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tm1637Error {
    Pin,
    NoAck,
}

/// Segment bytes for a 4-digit number, e.g. 942 shows as " 9:42".
///
/// The leading digit is blanked when zero; the colon sits on the second digit.
pub fn encode_number(value: u16, colon: bool) -> [u8; 4] {
    let v = value.min(9999);
    let digits = [v / 1000, (v / 100) % 10, (v / 10) % 10, v % 10];
    let mut segments = digits.map(|d| SEG_DIGITS[d as usize]);
    if digits[0] == 0 {
        segments[0] = SEG_BLANK;
    }
    if colon {
        segments[1] |= SEG_COLON;
    }
    segments
}

/// Display-control command for an 8-bit brightness. 0 turns the display off,
/// everything else maps onto the chip's 8 pulse-width levels.
pub fn brightness_command(brightness: u8) -> u8 {
    if brightness == 0 {
        CMD_DISPLAY_CONTROL
    } else {
        CMD_DISPLAY_CONTROL | DISPLAY_ON | (brightness >> 5)
    }
}

pub struct Tm1637<CLK, DIO, D> {
    clk: CLK,
    dio: DIO,
    delay: D,
}

impl<CLK, DIO, D> Tm1637<CLK, DIO, D>
where
    CLK: OutputPin,
    DIO: OutputPin + InputPin,
    D: DelayNs,
{
    /// Take the pins, blank the display and check that the chip answers.
    pub fn init(clk: CLK, dio: DIO, delay: D) -> Result<Self> {
        let mut tm = Tm1637 { clk, dio, delay };
        tm.write_segments([SEG_BLANK; 4], brightness_command(0xFF))
            .map_err(|e| ClockError::PeripheralInitFailure {
                peripheral: "TM1637",
                reason: format!("{:?}", e),
            })?;
        Ok(tm)
    }

    pub fn write_segments(
        &mut self,
        segments: [u8; 4],
        control: u8,
    ) -> core::result::Result<(), Tm1637Error> {
        self.command(&[CMD_DATA_AUTO_INCREMENT])?;

        let mut frame = [CMD_ADDRESS_FIRST_DIGIT; 5];
        frame[1..].copy_from_slice(&segments);
        self.command(&frame)?;

        self.command(&[control])
    }

    pub fn release(self) -> (CLK, DIO, D) {
        (self.clk, self.dio, self.delay)
    }

    fn command(&mut self, bytes: &[u8]) -> core::result::Result<(), Tm1637Error> {
        self.start()?;
        for &b in bytes {
            if let Err(e) = self.write_byte(b) {
                // Leave the bus idle so the next frame can start cleanly.
                let _ = self.stop();
                return Err(e);
            }
        }
        self.stop()
    }

    fn start(&mut self) -> core::result::Result<(), Tm1637Error> {
        self.dio_high()?;
        self.clk_high()?;
        self.bit_delay();
        self.dio_low()?;
        self.bit_delay();
        Ok(())
    }

    fn stop(&mut self) -> core::result::Result<(), Tm1637Error> {
        self.clk_low()?;
        self.bit_delay();
        self.dio_low()?;
        self.bit_delay();
        self.clk_high()?;
        self.bit_delay();
        self.dio_high()?;
        self.bit_delay();
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> core::result::Result<(), Tm1637Error> {
        for i in 0..8 {
            self.clk_low()?;
            self.bit_delay();
            if byte & (1 << i) != 0 {
                self.dio_high()?;
            } else {
                self.dio_low()?;
            }
            self.bit_delay();
            self.clk_high()?;
            self.bit_delay();
        }

        // ACK: release DIO and sample it on the ninth clock.
        self.clk_low()?;
        self.dio_high()?;
        self.bit_delay();
        self.clk_high()?;
        self.bit_delay();
        let acked = self.dio.is_low().map_err(|_| Tm1637Error::Pin)?;
        self.clk_low()?;
        self.bit_delay();

        if acked {
            Ok(())
        } else {
            Err(Tm1637Error::NoAck)
        }
    }

    fn bit_delay(&mut self) {
        self.delay.delay_us(BIT_DELAY_US);
    }

    fn clk_high(&mut self) -> core::result::Result<(), Tm1637Error> {
        self.clk.set_high().map_err(|_| Tm1637Error::Pin)
    }

    fn clk_low(&mut self) -> core::result::Result<(), Tm1637Error> {
        self.clk.set_low().map_err(|_| Tm1637Error::Pin)
    }

    fn dio_high(&mut self) -> core::result::Result<(), Tm1637Error> {
        self.dio.set_high().map_err(|_| Tm1637Error::Pin)
    }

    fn dio_low(&mut self) -> core::result::Result<(), Tm1637Error> {
        self.dio.set_low().map_err(|_| Tm1637Error::Pin)
    }
}

impl<CLK, DIO, D> SegmentDisplay for Tm1637<CLK, DIO, D>
where
    CLK: OutputPin,
    DIO: OutputPin + InputPin,
    D: DelayNs,
{
    type Error = Tm1637Error;

    fn set_number(
        &mut self,
        value: u16,
        colon: bool,
        brightness: u8,
    ) -> core::result::Result<(), Self::Error> {
        self.write_segments(encode_number(value, colon), brightness_command(brightness))
    }
}
