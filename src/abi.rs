//! Binary ABI shared with the NDIS filter driver.
//!
//! Everything under this module is wire format: fixed-layout records,
//! constants and ioctl codes that must match the kernel peer bit for bit.
//! Higher-level policy (builders, engines, table management) lives outside.

pub mod constants;
pub mod fastio;
pub mod filters;
pub mod ioctl;
pub mod records;

pub use self::constants::*;
pub use self::fastio::*;
pub use self::filters::*;
pub use self::ioctl::*;
pub use self::records::*;
