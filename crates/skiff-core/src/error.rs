//! Error types for the core codec.

use thiserror::Error;

/// Errors that can occur while decoding a transaction from the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before a complete field could be read.
    #[error("truncated encoding: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the next field.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A declared element count cannot fit in the remaining input.
    #[error("oversized count: {declared} elements declared, {remaining} bytes remaining")]
    Oversized {
        /// Element count declared by the encoding.
        declared: usize,
        /// Bytes left in the input.
        remaining: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncated() {
        let e = CodecError::Truncated {
            needed: 32,
            remaining: 7,
        };
        assert_eq!(
            e.to_string(),
            "truncated encoding: needed 32 bytes, 7 remaining"
        );
    }

    #[test]
    fn display_oversized() {
        let e = CodecError::Oversized {
            declared: 1_000_000,
            remaining: 12,
        };
        assert_eq!(
            e.to_string(),
            "oversized count: 1000000 elements declared, 12 bytes remaining"
        );
    }

    #[test]
    fn clone_and_eq() {
        let e1 = CodecError::Truncated {
            needed: 4,
            remaining: 0,
        };
        let e2 = e1.clone();
        assert_eq!(e1, e2);
    }
}
