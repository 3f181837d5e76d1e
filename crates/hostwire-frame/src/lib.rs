//! Length-prefixed message framing.
//!
//! Every protocol message travels as exactly one frame:
//! - A 2-byte magic number ("HW") for stream synchronization
//! - A 4-byte little-endian payload length
//! - The UTF-8 encoded message text
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
