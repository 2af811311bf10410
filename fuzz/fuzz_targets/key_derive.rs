#![no_main]

use bitcoin::Network;
use libfuzzer_sys::fuzz_target;
use tapmemo_core::KeyMaterial;

fuzz_target!(|data: &[u8]| {
    // KeyMaterial::derive must never panic. Every key it accepts must have a
    // signing key matching its output key.
    if let Ok(keys) = KeyMaterial::derive(data) {
        assert!(keys.is_consistent());
        let _ = keys.output_address(Network::Testnet);
    }
});
