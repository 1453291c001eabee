// Payment core: initiation, webhook reconciliation and their support pieces

pub mod errors;
pub mod events;
pub mod initiator;
pub mod metrics;
pub mod reconciler;
pub mod signature;

pub use errors::PaymentError;
pub use initiator::PaymentInitiator;
pub use reconciler::Reconciler;
