//! Persistence model for the stock ledger.
//!
//! `batch` is the ledger itself: one row per (medicine, location,
//! expiration date). Medicines and locations are its two endpoints.

pub mod batch;
pub mod location;
pub mod medicine;
pub mod provider;

pub use batch::{Entity as Batch, Model as BatchModel};
pub use location::{Entity as Location, Model as LocationModel};
pub use medicine::{Entity as Medicine, Formulation, Model as MedicineModel};
pub use provider::{Entity as Provider, Model as ProviderModel};
