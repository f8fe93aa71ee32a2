pub mod access;
pub mod base_pke;
pub mod curve;
pub mod drbg;
pub mod errors;
pub mod ffi_kem;
pub mod kem;
pub mod keys;
pub mod schemes;
pub mod utils;
