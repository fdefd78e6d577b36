pub mod broadcast;
pub mod covenant;
pub mod error;
pub mod script;
pub mod select;
pub mod sign;
pub mod tx;

pub use broadcast::{BroadcastOutcome, Broadcaster};
pub use covenant::CompiledCovenant;
pub use error::GuardianError;
pub use select::{Survey, UtxoSelector};
pub use sign::Signer;
pub use tx::{ClaimPlan, ClaimTransactionBuilder};
