// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

mod classify;
mod deadline;
mod session;
mod transport;

pub use transport::{FtpTransport, FtpTransportConstructionError};
