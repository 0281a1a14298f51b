use crate::errors::SelectionError;
use schnorrkel::{
    signing_context,
    vrf::{VRFPreOut, VRFProof},
    ExpansionMode, Keypair, MiniSecretKey, PublicKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const VRF_SIGNING_CONTEXT: &[u8] = b"periodiq:period-result";
const VRF_OUTPUT_CONTEXT: &[u8] = b"periodiq:outcome-bytes";
const MAX_RESAMPLE_ROUNDS: u32 = 64;

/// Everything a client needs to re-derive and check a period result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VrfBundle {
    /// Hex-encoded 32-byte output the outcome is derived from
    pub vrf_output: String,
    /// Hex-encoded VRF pre-output
    pub vrf_pre_output: String,
    /// Hex-encoded 64-byte proof
    pub vrf_proof: String,
    /// Hex-encoded operator public key
    pub public_key: String,
    /// Message the VRF was evaluated on
    pub input_message: String,
}

impl VrfBundle {
    pub fn output_bytes(&self) -> Result<[u8; 32], String> {
        hex::decode(&self.vrf_output)
            .map_err(|e| format!("Invalid VRF output hex: {}", e))?
            .try_into()
            .map_err(|_| "VRF output must be 32 bytes".to_string())
    }
}

/// VRF-based period outcome generator.
///
/// The output depends only on the operator key and the message, so every
/// worker holding the key derives the same draw for the same period.
pub struct VrfEngine {
    keypair: Arc<Keypair>,
}

impl VrfEngine {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Random keypair (tests and throwaway dev runs)
    pub fn new_random() -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng))
    }

    /// Keypair expanded from a 32-byte mini secret
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, String> {
        let mini =
            MiniSecretKey::from_bytes(seed).map_err(|e| format!("Invalid VRF seed: {:?}", e))?;
        Ok(Self::new(mini.expand_to_keypair(ExpansionMode::Ed25519)))
    }

    /// Evaluate the VRF on `message`
    pub fn draw(&self, message: &str) -> VrfBundle {
        let ctx = signing_context(VRF_SIGNING_CONTEXT);
        let (inout, proof, _) = self.keypair.vrf_sign(ctx.bytes(message.as_bytes()));
        let output: [u8; 32] = inout.make_bytes(VRF_OUTPUT_CONTEXT);

        VrfBundle {
            vrf_output: hex::encode(output),
            vrf_pre_output: hex::encode(inout.to_preout().to_bytes()),
            vrf_proof: hex::encode(proof.to_bytes()),
            public_key: self.public_key_hex(),
            input_message: message.to_string(),
        }
    }

    /// Verify a bundle against the message it claims to cover (public check)
    pub fn verify(bundle: &VrfBundle, expected_message: &str) -> Result<bool, String> {
        if bundle.input_message != expected_message {
            return Ok(false);
        }

        let public_key_bytes = hex::decode(&bundle.public_key)
            .map_err(|e| format!("Invalid public key hex: {}", e))?;
        let public_key = PublicKey::from_bytes(&public_key_bytes)
            .map_err(|e| format!("Invalid public key: {:?}", e))?;
        let pre_output_bytes = hex::decode(&bundle.vrf_pre_output)
            .map_err(|e| format!("Invalid VRF pre-output hex: {}", e))?;
        let pre_output = VRFPreOut::from_bytes(&pre_output_bytes)
            .map_err(|e| format!("Invalid VRF pre-output: {:?}", e))?;
        let proof_bytes =
            hex::decode(&bundle.vrf_proof).map_err(|e| format!("Invalid VRF proof hex: {}", e))?;
        let proof = VRFProof::from_bytes(&proof_bytes)
            .map_err(|e| format!("Invalid VRF proof: {:?}", e))?;

        let ctx = signing_context(VRF_SIGNING_CONTEXT);
        let Ok((inout, _)) =
            public_key.vrf_verify(ctx.bytes(expected_message.as_bytes()), &pre_output, &proof)
        else {
            return Ok(false);
        };

        let output: [u8; 32] = inout.make_bytes(VRF_OUTPUT_CONTEXT);
        Ok(bundle.output_bytes()? == output)
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.keypair.public.to_bytes().to_vec()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }
}

/// Map VRF output to an index in `0..space` without modulo bias.
///
/// Rejection sampling over 32-bit words; when every word of a block falls in
/// the rejection zone the block is rehashed.
pub fn uniform_index(output: &[u8; 32], space: u32) -> Result<u32, SelectionError> {
    if space == 0 {
        return Err(SelectionError::Vrf("empty outcome space".to_string()));
    }
    let zone = (u32::MAX / space) * space;
    let mut block = *output;

    for round in 0..MAX_RESAMPLE_ROUNDS {
        for word in block.chunks_exact(4) {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            if value < zone {
                return Ok(value % space);
            }
        }
        let mut hasher = Sha256::new();
        hasher.update(block);
        hasher.update(round.to_le_bytes());
        block = hasher.finalize().into();
    }

    Err(SelectionError::Vrf(format!(
        "no unbiased sample after {} rounds",
        MAX_RESAMPLE_ROUNDS
    )))
}
