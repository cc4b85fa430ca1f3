pub mod intake;
pub mod ledger;
pub mod message;
pub mod outbox;
pub mod shipment;
