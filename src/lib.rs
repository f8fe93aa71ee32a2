extern crate quick_error;
mod internal;
pub mod pve;
pub mod pve_ac;
pub mod pve_batch;

pub use crate::internal::access::{AccessStructure, Node, NodeKind};
pub use crate::internal::base_pke::{
    BasePke, EciesPke, ExternalPke, KemPke, RsaPke, UnifiedPke, RHO_SIZE,
};
pub use crate::internal::curve::{CurveBN, CurvePoint, Params};
pub use crate::internal::drbg::{Drbg, SEED_SIZE};
pub use crate::internal::errors::{ErrorCode, PveErrors};
pub use crate::internal::ffi_kem::{ExternalDk, ExternalKem, KemCallbacks};
pub use crate::internal::kem::{
    EcdhP256, KemAeadCiphertext, KemPolicy, RsaOaep, KEM_AEAD_IV_SIZE, KEM_AEAD_TAG_SIZE,
};
pub use crate::internal::keys::{KeyType, PrivateKey, PublicKey, UnifiedCiphertext};
pub use crate::pve::{new_standard_params, EcPve, CHALLENGE_SIZE, KAPPA};
pub use crate::pve_ac::EcPveAc;
pub use crate::pve_batch::EcPveBatch;
