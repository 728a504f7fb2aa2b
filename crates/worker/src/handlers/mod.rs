//! Built-in handlers for the claim and KYC job types.

pub mod complete_claim;
pub mod init_claim;
pub mod kyc;

pub use complete_claim::CompleteClaimHandler;
pub use init_claim::InitClaimHandler;
pub use kyc::KycVerificationHandler;

use std::sync::Arc;

use crate::handler::HandlerRegistry;

/// Registry pre-populated with every built-in handler.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(InitClaimHandler::new()));
    registry.register(Arc::new(CompleteClaimHandler::new()));
    registry.register(Arc::new(KycVerificationHandler::new()));
    registry
}
