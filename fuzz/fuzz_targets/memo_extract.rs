#![no_main]

use bitcoin::ScriptBuf;
use libfuzzer_sys::fuzz_target;
use tapmemo_core::memo::{extract_memo, memo_script};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a script: extract_memo must never panic.
    let script = ScriptBuf::from_bytes(data.to_vec());
    let _ = extract_memo(&script);

    // Arbitrary bytes as a memo: encoding then extracting gives them back.
    if let Ok(script) = memo_script(data) {
        assert_eq!(extract_memo(&script).as_deref(), Some(data));
    }
});
