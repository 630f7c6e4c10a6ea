pub mod admission;
pub mod quota_guard;

pub use admission::{Admission, AdmissionReceipt, Rejection};
pub use quota_guard::QuotaGuard;
