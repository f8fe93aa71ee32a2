extern crate quick_error;
use quick_error::quick_error;

quick_error! {
  #[derive(Debug,PartialEq)]
  pub enum PveErrors {
      BadArg(reason: &'static str) {
        display("Bad argument: {}", reason)
      }
      Crypto(reason: &'static str) {
        display("Cryptographic check failed: {}", reason)
      }
      General(reason: &'static str) {
        display("General error: {}", reason)
      }
      InvalidBytes {
        display("The bytes given in input are not valid")
      }
  }
}

/// Coarse error classes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadArg,
    Crypto,
    General,
}

pub(crate) const DECRYPTION_FAILED: PveErrors = PveErrors::Crypto("decryption failed");

impl PveErrors {
    pub fn code(&self) -> ErrorCode {
        match self {
            PveErrors::BadArg(_) | PveErrors::InvalidBytes => ErrorCode::BadArg,
            PveErrors::Crypto(_) => ErrorCode::Crypto,
            PveErrors::General(_) => ErrorCode::General,
        }
    }

    pub fn is_crypto(&self) -> bool {
        self.code() == ErrorCode::Crypto
    }
}

impl From<openssl::error::ErrorStack> for PveErrors {
    fn from(_: openssl::error::ErrorStack) -> Self {
        PveErrors::General("openssl failure")
    }
}
