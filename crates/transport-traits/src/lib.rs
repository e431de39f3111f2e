// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

mod dyn_transport;
mod failure;
mod from_config;
mod transport;
mod transport_info;

pub use dyn_transport::DynTransport;
pub use failure::{FailureKind, TransportFailure};
pub use from_config::{CreateTransportError, TryCreateFromConfig};
pub use transport::{Transport, TransportTag};
pub use transport_info::TransportInfo;
