//! Process-backed toolchains for the build node.
//!
//! Builders run as process groups with rlimits applied; sources come from
//! git, HTTP or the local filesystem.

mod error;
pub use error::{ExecError, ExecResult};

pub mod fetch;
pub use fetch::Fetcher;

pub mod limits;
pub use limits::RlimitConfig;

pub mod proc;
pub use proc::ProcConfig;

pub mod toolchain;
pub use toolchain::{CommandToolchain, router};

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{CommandToolchain, Fetcher, RlimitConfig};
}
