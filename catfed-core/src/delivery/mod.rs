//! Out-of-band file delivery
//!
//! Derived files (thumbnails, order packages) are pushed to an external
//! store with `PUT <base>/<filename>`. Filenames are derived
//! deterministically in [`naming`]; the [`DeliveryDispatcher`] owns retry
//! policy, the per-filename conflict guard and the receipt ledger.

mod dispatcher;
mod locks;
pub mod naming;
mod sink;

pub use dispatcher::{DeliveryDispatcher, DeliveryReceipt};
pub(crate) use locks::FilenameLocks;
pub use sink::{DeliverySink, HttpSink, Upload};
