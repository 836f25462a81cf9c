//! Core value types of the runtime.
//!
//! - [`id`]: Identifier and time types (`FiberId`, `Time`)
//! - [`cause`]: The cause algebra for abnormal termination
//! - [`exit`]: Terminal success-or-cause results

pub mod cause;
pub mod exit;
pub mod id;

pub use cause::{Cause, CauseLeaf, CauseReducer, Defect, Leaves, Subcause};
pub use exit::Exit;
pub use id::{FiberId, Time};
