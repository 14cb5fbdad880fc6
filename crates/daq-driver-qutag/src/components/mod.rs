//! Internal components of the quTAG driver.
//!
//! Split by concern: session lifecycle ([`connection`]), cross-driver
//! serialization ([`synchronizer`]), parameter control ([`channels`]), bulk
//! timestamp handling ([`timestamps`]), counter caching ([`coincidence`]) and
//! correlation ([`hbt`]). The driver in the crate root composes these.

pub mod channels;
pub mod coincidence;
pub mod connection;
pub mod hbt;
pub mod synchronizer;
pub mod timestamps;
