//! Small domain values shared across the e-prescription processing core.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod kvnr;
mod paging;
mod prescription_type;
pub mod profession_oid;

pub use kvnr::{Kvnr, KvnrError};
pub use paging::{PagingArgument, PagingError, DEFAULT_PAGE_SIZE};
pub use prescription_type::PrescriptionType;
