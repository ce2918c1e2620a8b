mod receipt;

pub use receipt::{write_claim_receipt, ClaimReceipt};
