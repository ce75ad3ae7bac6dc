//! Transport boundary toward the radio bridge
//!
//! The lifecycle handlers hand fully formed commands to a [`Transport`];
//! send scheduling, retry and acknowledgement live below this boundary.

mod tcp;
mod traits;

pub use tcp::TcpTransport;
pub use traits::{DeliveryClass, OutboundCommand, Transport};

#[cfg(test)]
pub use traits::testing;
