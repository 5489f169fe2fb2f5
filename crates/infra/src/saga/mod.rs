//! Cross-service flows: the sale saga, manual adjustments and compensation recovery.

pub mod adjustment;
pub mod compensation;
pub mod recovery;
pub mod sale;

pub use adjustment::{AdjustmentError, AdjustmentFlow, AdjustmentOutcome};
pub use compensation::{CompensationOutcome, Compensator};
pub use recovery::{CompensationRecovery, RecoveryHandle, SweepReport};
pub use sale::{SaleError, SaleSaga};
