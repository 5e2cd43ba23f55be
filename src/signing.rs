//! `Signer` implementation for venue B's on-chain order payloads.
//!
//! Real L1 action signing (EIP-712 + secp256k1, matching the venue's wallet
//! format) is explicitly out of scope (§1 Non-goals: "venue REST/WS client
//! SDK plumbing beyond the adapter surface"). The composition root still
//! needs a concrete `Signer` to construct `OnchainClient`, so this uses the
//! same HMAC primitive the venue A client signs requests with rather than
//! vendoring a full signing stack.

use crate::error::{ExchangeError, ExchangeResult, Venue};
use crate::venues::Signer;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct EnvSigner {
    private_key: String,
}

impl EnvSigner {
    pub fn new(private_key: String) -> Self {
        Self { private_key }
    }
}

impl Signer for EnvSigner {
    fn sign_l1_action(&self, action: &serde_json::Value) -> ExchangeResult<String> {
        let payload = serde_json::to_vec(action)
            .map_err(|e| ExchangeError::order(Venue::Onchain, format!("action serialize failed: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(self.private_key.as_bytes())
            .expect("hmac accepts key of any length");
        mac.update(&payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
