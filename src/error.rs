//! Binary Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not retrieve SFTP credentials")]
    Credentials,
    #[display("could not connect to the SFTP server")]
    Connect,
    #[display("transfer run failed")]
    Run,
}
