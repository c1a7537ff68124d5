//! Wire protocol error types.

use thiserror::Error;

/// Frame decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the fixed part of the frame
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete {
        /// Bytes required by the fixed layout
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Byte length disagrees with the length implied by the frame's own fields
    #[error("length mismatch: frame declares {declared} bytes, buffer holds {actual}")]
    LengthMismatch {
        /// Length implied by `num_args` / `size`
        declared: usize,
        /// Length of the supplied buffer
        actual: usize,
    },

    /// More arguments than the `u16` length field can describe
    #[error("too many args: {count} (max {})", crate::MAX_ARGS)]
    TooManyArgs {
        /// Argument count requested
        count: usize,
    },

    /// Unknown transport packet type
    #[error("unknown packet type {0}")]
    PacketType(u8),
}
