use std::time::Duration;

use derive_builder::Builder;

use lot_packets::bitmap::MAX_WINDOW_SIZE;
use lot_packets::frame::DATA_HEADER_LEN;
use lot_types::TransferError;

/// Transfer parameters, negotiated out of band and immutable for the
/// lifetime of a context.
///
/// Example:
///
/// ```
/// use lot::params::TransferParamsBuilder;
///
/// let params = TransferParamsBuilder::default()
///     .mtu(23)
///     .window_size(4)
///     .timeout_ms(100)
///     .max_retries(3)
///     .build()
///     .unwrap();
///
/// assert!(params.validate().is_ok());
/// assert_eq!(params.block_size(), 18);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Builder)]
pub struct TransferParams {
    /// Largest packet the link carries, header included.
    pub mtu: u16,
    /// Blocks per window, 1..=32 so the missing-block bitmap fits 4 bytes.
    pub window_size: u16,
    /// Receiver's delayed-ACK timeout; the sender retransmits after twice
    /// this.
    pub timeout_ms: u16,
    /// Full-window retransmissions before a send session is parked.
    pub max_retries: u16,
}

impl TransferParams {
    /// Checks the ranges the protocol relies on.
    ///
    /// ```
    /// use lot::params::TransferParamsBuilder;
    ///
    /// let params = TransferParamsBuilder::default()
    ///     .mtu(5) // no room for payload after the 5-byte header
    ///     .window_size(4)
    ///     .timeout_ms(100)
    ///     .max_retries(3)
    ///     .build()
    ///     .unwrap();
    /// assert!(params.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), TransferError> {
        if (self.mtu as usize) < DATA_HEADER_LEN + 1 {
            return Err(TransferError::InvalidParam);
        }
        if self.window_size < 1 || self.window_size > MAX_WINDOW_SIZE {
            return Err(TransferError::InvalidParam);
        }
        if self.timeout_ms == 0 {
            return Err(TransferError::InvalidParam);
        }
        Ok(())
    }

    /// Payload bytes per block.
    pub fn block_size(&self) -> u16 {
        self.mtu - DATA_HEADER_LEN as u16
    }

    /// Delay before the receiver acknowledges a partial window.
    pub fn ack_delay(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }

    /// Delay before the sender re-emits an unacknowledged window.
    pub fn retransmit_delay(&self) -> Duration {
        Duration::from_millis(2 * self.timeout_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TransferParamsBuilder {
        let mut builder = TransferParamsBuilder::default();
        builder.mtu(23).window_size(4).timeout_ms(100).max_retries(3);
        builder
    }

    #[test]
    fn accepts_sane_parameters() {
        let params = base().build().unwrap();
        assert!(params.validate().is_ok());
        assert_eq!(params.block_size(), 18);
        assert_eq!(params.ack_delay(), Duration::from_millis(100));
        assert_eq!(params.retransmit_delay(), Duration::from_millis(200));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(base().mtu(5).build().unwrap().validate().is_err());
        assert!(base().window_size(0).build().unwrap().validate().is_err());
        assert!(base().window_size(33).build().unwrap().validate().is_err());
        assert!(base().timeout_ms(0).build().unwrap().validate().is_err());
        // zero retries is legal: one shot per window, no rescue
        assert!(base().max_retries(0).build().unwrap().validate().is_ok());
    }
}
