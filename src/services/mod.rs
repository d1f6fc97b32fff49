pub mod access;
pub mod alerts;
pub mod booking;
pub mod fees;
pub mod ledger;
pub mod payments;
pub mod payout;
pub mod providers;
pub mod reconcile;
pub mod reference;
pub mod subscription;

#[cfg(test)]
pub(crate) mod testing;
