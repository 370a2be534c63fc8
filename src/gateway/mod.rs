//! Gateway: the request pipeline over the session registry, the process
//! supervisor and the response formatter.

mod error;
mod service;

pub use error::*;
pub use service::*;
