use std::mem::discriminant;

use alloy::primitives::TxHash;
use thiserror::Error;

use crate::provider::ProviderError;

/// Errors surfaced by watchers (through `on_error`) and by receipt waits.
///
/// Watchers keep running after reporting an error. A receipt wait settles with at most one of
/// these.
#[derive(Error, Debug, Clone)]
pub enum WatchError {
    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The wait's timeout elapsed before the transaction was confirmed.
    #[error("Timed out while waiting for transaction with hash {hash} to be confirmed")]
    ReceiptTimeout { hash: TxHash },

    /// The caller's cancellation signal fired.
    #[error("Wait aborted")]
    Aborted,
}

impl WatchError {
    /// Returns `true` if the error only means "not available yet".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, WatchError::Provider(err) if err.is_not_found())
    }
}

impl<T> PartialEq<WatchError> for Result<T, WatchError> {
    fn eq(&self, other: &WatchError) -> bool {
        match self {
            Ok(_) => false,
            Err(err) => discriminant(err) == discriminant(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        primitives::B256,
        transports::{RpcError, TransportErrorKind},
    };

    #[test]
    fn provider_errors_convert_transparently() {
        let err: WatchError = ProviderError::ReceiptNotFound(B256::ZERO).into();

        assert!(err.is_not_found());
        assert_eq!(err.to_string(), ProviderError::ReceiptNotFound(B256::ZERO).to_string());
    }

    #[test]
    fn rpc_errors_are_not_not_found() {
        let rpc_err: RpcError<TransportErrorKind> = TransportErrorKind::BackendGone.into();
        let err: WatchError = ProviderError::from(rpc_err).into();

        assert!(!err.is_not_found());
        assert!(matches!(err, WatchError::Provider(ProviderError::RpcError(_))));
    }

    #[test]
    fn result_compares_by_error_variant() {
        let hash = B256::with_last_byte(1);
        let result: Result<(), WatchError> = Err(WatchError::ReceiptTimeout { hash });

        assert_eq!(result, WatchError::ReceiptTimeout { hash: B256::ZERO });
        assert!(result != WatchError::Aborted);
        assert!(Ok::<(), WatchError>(()) != WatchError::Aborted);
    }
}
