//! Core trait defining the verification and settlement interface for x402 facilitators.
//!
//! Implementors validate incoming payment payloads against declared requirements
//! ([`Facilitator::verify`]) and execute on-chain transfers ([`Facilitator::settle`]).

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::types::{
    SettleRequest, SettleResponse, SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};

/// Trait defining the asynchronous interface for x402 payment facilitators.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Verifies a proposed x402 payment payload against declared requirements.
    ///
    /// Covers payload integrity, signature validity, authorization windows,
    /// balance sufficiency, and network compatibility, without touching any
    /// chain state-changing path.
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Executes an on-chain x402 settlement for a valid [`SettleRequest`].
    ///
    /// Re-validates the payment and, if valid, submits the transfer on-chain and
    /// waits for confirmation.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    /// Enumerates the (version, scheme, network) kinds this facilitator settles.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedPaymentKindsResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedPaymentKindsResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
