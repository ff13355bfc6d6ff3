use serde::{Deserialize, Serialize};

use strongroom_core::{rmp_serde, serde, ElasticKeyId};
use strongroom_encryption::Envelope;

use crate::BarrierError;

const CONTENT_AAD_LABEL: &[u8] = b"strongroom/content/v1";
const SIGNATURE_LABEL: &[u8] = b"strongroom/signature/v1";

/// Self describing ciphertext returned by encrypt. Names the version it was
/// produced under so decrypt never has to guess.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct Ciphertext {
    pub elastic_key_id: ElasticKeyId,
    pub version: u32,
    pub envelope: Envelope,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct SignatureBlob {
    pub elastic_key_id: ElasticKeyId,
    pub version: u32,
    pub signature: Vec<u8>,
}

macro_rules! blob_codec {
    ($name:ident) => {
        impl $name {
            pub fn to_bytes(&self) -> Result<Vec<u8>, BarrierError> {
                rmp_serde::to_vec(self).map_err(|err| BarrierError::Crypto(err.to_string()))
            }

            /// Anything unparsable is treated as tampering.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, BarrierError> {
                rmp_serde::from_slice(bytes).map_err(|_| BarrierError::AuthenticationFailure)
            }

            pub(crate) fn expect_key(&self, elastic_key_id: ElasticKeyId) -> Result<(), BarrierError> {
                if self.elastic_key_id != elastic_key_id {
                    return Err(BarrierError::AuthenticationFailure);
                }
                Ok(())
            }
        }
    };
}

blob_codec!(Ciphertext);
blob_codec!(SignatureBlob);

fn bind(label: &[u8], elastic_key_id: &ElasticKeyId, version: u32, tail: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(label.len() + 20 + tail.len());
    out.extend_from_slice(label);
    out.extend_from_slice(elastic_key_id.as_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(tail);
    out
}

/// Associated data binding content ciphertext to its key, version and the
/// caller supplied context.
pub(crate) fn content_aad(elastic_key_id: &ElasticKeyId, version: u32, context: &[u8]) -> Vec<u8> {
    bind(CONTENT_AAD_LABEL, elastic_key_id, version, context)
}

/// Signed bytes: the message bound to key and version, in its own domain.
pub(crate) fn signing_input(elastic_key_id: &ElasticKeyId, version: u32, message: &[u8]) -> Vec<u8> {
    bind(SIGNATURE_LABEL, elastic_key_id, version, message)
}
