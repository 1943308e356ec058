//! Transaction cache error types.

use skiff_core::CodecError;
use thiserror::Error;

/// Errors surfaced by the transaction cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxDbError {
    /// An ntxid query named a cluster with no rows.
    #[error("tx isn't in the database")]
    NotInDatabase,

    /// A snapshot carries the legacy magic and cannot be read.
    #[error("outdated transaction database format")]
    OutdatedFormat,

    /// A snapshot carries an unrecognized magic.
    #[error("unknown transaction database header")]
    UnknownHeader,

    /// A snapshot ended mid-record.
    #[error("truncated transaction database")]
    Truncated,

    /// A snapshot record kind byte was not recognized.
    #[error("unknown entry in transaction database")]
    UnknownRecord,

    /// An embedded transaction encoding failed to parse.
    #[error("malformed transaction in database: {0}")]
    Codec(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_in_database() {
        assert_eq!(
            TxDbError::NotInDatabase.to_string(),
            "tx isn't in the database"
        );
    }

    #[test]
    fn display_outdated_format() {
        assert_eq!(
            TxDbError::OutdatedFormat.to_string(),
            "outdated transaction database format"
        );
    }

    #[test]
    fn from_codec_error() {
        let codec = CodecError::Truncated {
            needed: 4,
            remaining: 1,
        };
        let err: TxDbError = codec.clone().into();
        assert_eq!(err, TxDbError::Codec(codec));
    }

    #[test]
    fn clone_and_eq() {
        let e1 = TxDbError::UnknownRecord;
        let e2 = e1.clone();
        assert_eq!(e1, e2);
    }
}
