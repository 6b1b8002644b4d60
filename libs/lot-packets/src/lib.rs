pub mod bitmap;
pub mod frame;
pub mod reader;
pub mod writer;

// LOT wire format:
// - u16 LE: session id (non-zero; 0 is reserved)
// - DATA frames continue with:
//   - u16 LE: block number within the current window
//   - u8:     flags (last block / resume / window color, high bits reserved)
//   - *:      block payload, up to mtu - 5 bytes
// - ACK frames continue with:
//   - u8:     error code (0 == success)
//   - *:      optional missing-block bitmap, ceil(window_size / 8) bytes
