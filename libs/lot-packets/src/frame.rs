use anyhow::{anyhow, Result};
use bitflags::bitflags;

use lot_types::{TransferError, WindowColor};

use crate::reader::LittleEndianReader;
use crate::writer::LittleEndianWriter;

/// Size of the DATA frame header preceding the block payload.
pub const DATA_HEADER_LEN: usize = 5;

/// Size of an ACK frame without its optional bitmap.
pub const ACK_HEADER_LEN: usize = 3;

bitflags! {
    /// Flags byte of a DATA frame.
    ///
    /// Bits 3..7 are reserved: senders set them to 1, receivers keep them
    /// without interpreting them. RESUME is allocated but never emitted;
    /// decoders must not reject it.
    pub struct BlockFlags: u8 {
       const LAST_BLOCK = 0b_0000_0001;
       const RESUME     = 0b_0000_0010;
       const ODD_WINDOW = 0b_0000_0100;
       const RESERVED   = 0b_1111_1000;
    }
}

impl BlockFlags {
    /// Flags as a sender emits them: reserved bits high, color and
    /// last-block bit folded in.
    ///
    /// ```
    /// use lot_packets::frame::BlockFlags;
    /// use lot_types::WindowColor;
    ///
    /// assert_eq!(BlockFlags::emit(WindowColor::Even, false).bits(), 0xF8);
    /// assert_eq!(BlockFlags::emit(WindowColor::Even, true).bits(), 0xF9);
    /// assert_eq!(BlockFlags::emit(WindowColor::Odd, false).bits(), 0xFC);
    /// assert_eq!(BlockFlags::emit(WindowColor::Odd, true).bits(), 0xFD);
    /// ```
    pub fn emit(color: WindowColor, last_block: bool) -> Self {
        let mut flags = BlockFlags::RESERVED;
        if last_block {
            flags |= BlockFlags::LAST_BLOCK;
        }
        if color == WindowColor::Odd {
            flags |= BlockFlags::ODD_WINDOW;
        }
        flags
    }

    pub fn color(self) -> WindowColor {
        if self.contains(BlockFlags::ODD_WINDOW) {
            WindowColor::Odd
        } else {
            WindowColor::Even
        }
    }

    pub fn last_block(self) -> bool {
        self.contains(BlockFlags::LAST_BLOCK)
    }
}

/// A single block of an object in flight.
///
/// # Binary layout
///
/// | Size  | Description                                      |
/// |-------|--------------------------------------------------|
/// | `u16` | session id (little endian, non-zero)             |
/// | `u16` | block number within the current window           |
/// | `u8`  | flags, see [BlockFlags]                          |
/// | *     | block payload, up to `mtu - 5` bytes             |
#[derive(Debug, PartialEq)]
pub struct DataFrame<'a> {
    pub session_id: u16,
    pub block_num: u16,
    pub flags: BlockFlags,
    pub data: &'a [u8],
}

impl<'a> DataFrame<'a> {
    /// Parses a buffer as a DATA frame.
    ///
    /// Rejects only buffers shorter than the 5-byte header; unknown flag
    /// bits are preserved, not rejected.
    ///
    /// Examples:
    ///
    /// ```
    /// use lot_packets::frame::{BlockFlags, DataFrame};
    ///
    /// // short messages are rejected
    /// assert!(DataFrame::parse(&[]).is_err());
    /// assert!(DataFrame::parse(&[1, 0, 0, 0]).is_err());
    ///
    /// let frame = DataFrame::parse(&[
    ///    0x01, 0x00,       // session id 1
    ///    0x02, 0x00,       // block number 2
    ///    0xF9,             // reserved bits high, LAST_BLOCK
    ///    0xaa, 0xbb, 0xcc, // payload
    /// ]).unwrap();
    ///
    /// assert_eq!(frame.session_id, 1);
    /// assert_eq!(frame.block_num, 2);
    /// assert!(frame.flags.last_block());
    /// assert_eq!(frame.flags.color(), lot_types::WindowColor::Even);
    /// assert_eq!(frame.data, &[0xaa, 0xbb, 0xcc]);
    ///
    /// // a bare header is a valid zero-length block
    /// let frame = DataFrame::parse(&[0x01, 0x00, 0x00, 0x00, 0xFC]).unwrap();
    /// assert_eq!(frame.data, &[]);
    /// assert_eq!(frame.flags.color(), lot_types::WindowColor::Odd);
    /// ```
    pub fn parse(mut buffer: &'a [u8]) -> Result<DataFrame<'a>> {
        if buffer.len() < DATA_HEADER_LEN {
            return Err(anyhow!(
                "DATA frame too short: {} bytes, header is {}",
                buffer.len(),
                DATA_HEADER_LEN
            ));
        }

        let session_id = buffer.read_le_u16()?;
        let block_num = buffer.read_le_u16()?;
        let flags = BlockFlags::from_bits_truncate(buffer.read_le_u8()?);

        Ok(DataFrame {
            session_id,
            block_num,
            flags,
            data: buffer,
        })
    }

    pub fn write(&self, writer: &mut impl LittleEndianWriter) -> Result<()> {
        writer.write_le_u16(self.session_id)?;
        writer.write_le_u16(self.block_num)?;
        writer.write_le_u8(self.flags.bits())?;
        writer.write(self.data)?;
        Ok(())
    }

    /// Serializes the frame into a fresh buffer.
    ///
    /// ```
    /// use lot_packets::frame::{BlockFlags, DataFrame};
    /// use lot_types::WindowColor;
    ///
    /// let frame = DataFrame {
    ///     session_id: 0x1234,
    ///     block_num: 3,
    ///     flags: BlockFlags::emit(WindowColor::Odd, false),
    ///     data: &[1, 2],
    /// };
    ///
    /// assert_eq!(frame.encode(), &[0x34, 0x12, 0x03, 0x00, 0xFC, 1, 2]);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(DATA_HEADER_LEN + self.data.len());
        self.write(&mut buffer)
            .expect("writing into a Vec cannot fail");
        buffer
    }
}

/// Window acknowledgement, positive or negative.
///
/// # Binary layout
///
/// | Size  | Description                                        |
/// |-------|----------------------------------------------------|
/// | `u16` | session id (little endian)                         |
/// | `u8`  | error code, 0 == success                           |
/// | *     | optional missing-block bitmap (0 or `⌈ws/8⌉` bytes)|
///
/// An empty bitmap with success means the whole window arrived; a
/// non-empty bitmap lists the blocks still missing.
#[derive(Debug, PartialEq)]
pub struct AckFrame<'a> {
    pub session_id: u16,
    pub error: Option<TransferError>,
    pub bitmap: &'a [u8],
}

impl<'a> AckFrame<'a> {
    /// Parses a buffer as an ACK frame.
    ///
    /// Examples:
    ///
    /// ```
    /// use lot_packets::frame::AckFrame;
    /// use lot_types::TransferError;
    ///
    /// assert!(AckFrame::parse(&[0x01, 0x00]).is_err());
    ///
    /// let ack = AckFrame::parse(&[0x01, 0x00, 0x00]).unwrap();
    /// assert_eq!(ack.session_id, 1);
    /// assert_eq!(ack.error, None);
    /// assert_eq!(ack.bitmap, &[]);
    ///
    /// let ack = AckFrame::parse(&[0x02, 0x00, 0x00, 0b0000_0100]).unwrap();
    /// assert_eq!(ack.error, None);
    /// assert_eq!(ack.bitmap, &[0b0000_0100]);
    ///
    /// let ack = AckFrame::parse(&[0x02, 0x00, 0x04]).unwrap();
    /// assert_eq!(ack.error, Some(TransferError::WrongWindow));
    /// ```
    pub fn parse(mut buffer: &'a [u8]) -> Result<AckFrame<'a>> {
        if buffer.len() < ACK_HEADER_LEN {
            return Err(anyhow!(
                "ACK frame too short: {} bytes, header is {}",
                buffer.len(),
                ACK_HEADER_LEN
            ));
        }

        let session_id = buffer.read_le_u16()?;
        let error = TransferError::from_wire(buffer.read_le_u8()?);

        Ok(AckFrame {
            session_id,
            error,
            bitmap: buffer,
        })
    }

    pub fn write(&self, writer: &mut impl LittleEndianWriter) -> Result<()> {
        writer.write_le_u16(self.session_id)?;
        writer.write_le_u8(self.error.map_or(0, TransferError::wire_code))?;
        writer.write(self.bitmap)?;
        Ok(())
    }

    /// Serializes the frame into a fresh buffer.
    ///
    /// ```
    /// use lot_packets::frame::AckFrame;
    /// use lot_types::TransferError;
    ///
    /// let ack = AckFrame { session_id: 3, error: None, bitmap: &[0x05] };
    /// assert_eq!(ack.encode(), &[0x03, 0x00, 0x00, 0x05]);
    ///
    /// let nack = AckFrame {
    ///     session_id: 3,
    ///     error: Some(TransferError::SessionAborted),
    ///     bitmap: &[],
    /// };
    /// assert_eq!(nack.encode(), &[0x03, 0x00, 0x03]);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(ACK_HEADER_LEN + self.bitmap.len());
        self.write(&mut buffer)
            .expect("writing into a Vec cannot fail");
        buffer
    }
}

/// Reads the session id prefix shared by both frame types.
///
/// ```
/// use lot_packets::frame::peek_session_id;
///
/// assert_eq!(peek_session_id(&[0x34, 0x12, 0x00]), Some(0x1234));
/// assert_eq!(peek_session_id(&[0x34]), None);
/// ```
pub fn peek_session_id(packet: &[u8]) -> Option<u16> {
    let mut cursor = packet;
    cursor.read_le_u16().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_round_trip() {
        let payload = [7u8; 18];
        let frame = DataFrame {
            session_id: 1,
            block_num: 3,
            flags: BlockFlags::emit(WindowColor::Even, true),
            data: &payload,
        };

        let bytes = frame.encode();
        assert_eq!(bytes.len(), DATA_HEADER_LEN + 18);
        assert_eq!(&bytes[..DATA_HEADER_LEN], &[0x01, 0x00, 0x03, 0x00, 0xF9]);

        let parsed = DataFrame::parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn unknown_flag_bits_are_preserved() {
        // RESUME is never emitted today but must survive a decode
        let bytes = [0x01, 0x00, 0x00, 0x00, 0xFA];
        let frame = DataFrame::parse(&bytes).unwrap();
        assert!(frame.flags.contains(BlockFlags::RESUME));
        assert!(!frame.flags.last_block());
    }

    #[test]
    fn ack_with_wire_error() {
        let ack = AckFrame {
            session_id: 9,
            error: Some(TransferError::SessionNotFound),
            bitmap: &[],
        };
        let bytes = ack.encode();
        assert_eq!(bytes, &[0x09, 0x00, 0x02]);

        let parsed = AckFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.error, Some(TransferError::SessionNotFound));
    }

    #[test]
    fn ack_bitmap_is_the_tail() {
        let bytes = [0x01, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0x01];
        let parsed = AckFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.bitmap, &[0xFF, 0xFF, 0xFF, 0x01]);
    }
}
